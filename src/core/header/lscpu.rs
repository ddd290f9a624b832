//! `lscpu` header section, taken from the output of the `lscpu` command.

use std::path::PathBuf;

use tokio::process::Command;

use super::{
    error::{HeaderError, HeaderResult},
    HeaderFields, HeaderProducer, HeaderRecord,
};

const LSCPU: &str = "/usr/bin/lscpu";

/// `lscpu` labels that are kept and the field they become.
const KEYS: &[(&str, &str)] = &[
    ("Architecture", "architecture"),
    ("Byte Order", "byte_order"),
    ("CPU(s)", "cpus"),
    ("On-line CPU(s) list", "online_cpu_list"),
    ("Off-line CPU(s) list", "offline_cpu_list"),
    ("Model", "model"),
    ("Model name", "model_name"),
    ("Thread(s) per core", "threads_per_core"),
    ("Core(s) per socket", "cores_per_socket"),
    ("Socket(s)", "sockets"),
    ("NUMA node(s)", "numa_nodes"),
    ("CPU MHz", "cpu_mhz"),
    ("CPU max MHz", "cpu_max_mhz"),
    ("CPU min MHz", "cpu_min_mhz"),
    ("BogoMIPS", "bogomips"),
    ("Vendor ID", "vendor_id"),
    ("CPU family", "cpu_family"),
    ("Stepping", "stepping"),
];

pub struct LscpuProducer {
    command: PathBuf,
}

impl Default for LscpuProducer {
    fn default() -> Self {
        Self::with_command(LSCPU)
    }
}

impl LscpuProducer {
    pub fn with_command(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// Extracts the known `Label: value` lines of `lscpu` output.
///
/// Recent versions indent labels under headings; indentation is ignored.
pub fn parse_lscpu(output: &str) -> HeaderFields {
    let mut fields = HeaderFields::new();
    for line in output.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if let Some((_, name)) = KEYS.iter().find(|(l, _)| *l == label) {
            fields.push_str(name, value);
        }
    }
    fields
}

#[async_trait::async_trait]
impl HeaderProducer for LscpuProducer {
    fn name(&self) -> &'static str {
        "lscpu"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let command = self.command.display().to_string();
        let output = Command::new(&self.command)
            .env("LC_ALL", "C")
            .output()
            .await
            .map_err(|source| HeaderError::CommandExecution {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(HeaderError::CommandStatus {
                command,
                status: output.status.to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(HeaderRecord::fields("lscpu", parse_lscpu(&stdout)))
    }
}
