//! `cpuinfo` header section: one subsection per logical processor listed in
//! `/proc/cpuinfo`.
//!
//! POWER systems end the file with a machine description introduced by a
//! `timebase` line. That trailer becomes the separate `cpuinfo_power` section.

use std::path::PathBuf;

use super::{
    error::{HeaderError, HeaderResult},
    HeaderFields, HeaderProducer, HeaderRecord,
};

const PROC_CPUINFO: &str = "/proc/cpuinfo";

/// First key of the POWER machine trailer.
const TIMEBASE: &str = "timebase";

/// Trailer keys kept after `timebase`.
const POWER_KEYS: &[&str] = &["platform", "model", "machine", "firmware"];

#[derive(Clone, Copy)]
enum Kind {
    Str,
    Long,
    Double,
}

/// Keys of a processor block that are kept: (key, field, kind).
const KEYS: &[(&str, &str, Kind)] = &[
    ("clock", "mhz_clock", Kind::Double),
    ("vendor_id", "vendor_id", Kind::Str),
    ("cpu MHz", "cpu_mhz", Kind::Double),
    ("cache size", "cache_size", Kind::Double),
    ("physical id", "physical_id", Kind::Long),
    ("siblings", "siblings", Kind::Long),
    ("core id", "core_id", Kind::Long),
    ("cpu cores", "cpu_cores", Kind::Long),
    ("model name", "model_name", Kind::Str),
];

pub struct CpuInfoProducer {
    path: PathBuf,
}

impl Default for CpuInfoProducer {
    fn default() -> Self {
        Self::with_path(PROC_CPUINFO)
    }
}

impl CpuInfoProducer {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Leading number of a value such as `"512 KB"` or `"2200.000"`.
fn leading_number(value: &str) -> Option<&str> {
    value.split_whitespace().next()
}

/// Splits `/proc/cpuinfo` content into `proc<N>` subsections.
///
/// Lines before the first `processor` entry are ignored; unparsable numbers
/// are dropped from their subsection. Parsing stops at the POWER `timebase`
/// trailer.
pub fn parse_cpuinfo(content: &str) -> Vec<(String, HeaderFields)> {
    let mut processors: Vec<(String, HeaderFields)> = Vec::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key == TIMEBASE {
            break;
        }
        if key == "processor" {
            processors.push((format!("proc{}", value), HeaderFields::new()));
            continue;
        }
        let Some((_, fields)) = processors.last_mut() else {
            continue;
        };
        let Some((_, name, kind)) = KEYS.iter().find(|(k, ..)| *k == key) else {
            continue;
        };

        match kind {
            Kind::Str => fields.push_str(name, value),
            Kind::Long => {
                if let Some(v) = leading_number(value).and_then(|v| v.parse::<i64>().ok()) {
                    fields.push_long(name, v);
                }
            }
            Kind::Double => {
                if let Some(v) = leading_number(value).and_then(|v| v.parse::<f64>().ok()) {
                    fields.push_double(name, v);
                }
            }
        }
    }
    processors
}

#[async_trait::async_trait]
impl HeaderProducer for CpuInfoProducer {
    fn name(&self) -> &'static str {
        "cpuinfo"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| HeaderError::FileRead {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(HeaderRecord::subsections("cpuinfo", parse_cpuinfo(&content)))
    }
}

/// Extracts the POWER machine trailer of `/proc/cpuinfo`.
///
/// Empty when the file has no `timebase` line.
pub fn parse_cpuinfo_power(content: &str) -> HeaderFields {
    let mut fields = HeaderFields::new();
    let mut in_trailer = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if !in_trailer {
            if key != TIMEBASE {
                continue;
            }
            in_trailer = true;
            fields.push_str("timebase", value);
            if let Some(v) = leading_number(value).and_then(|v| v.parse::<i64>().ok()) {
                fields.push_long("power_timebase", v);
            }
            continue;
        }
        if POWER_KEYS.contains(&key) {
            fields.push_str(key, value);
        }
    }
    fields
}

/// `cpuinfo_power` section, only present on POWER hosts.
pub struct CpuInfoPowerProducer {
    path: PathBuf,
}

impl Default for CpuInfoPowerProducer {
    fn default() -> Self {
        Self::with_path(PROC_CPUINFO)
    }
}

impl CpuInfoPowerProducer {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl HeaderProducer for CpuInfoPowerProducer {
    fn name(&self) -> &'static str {
        "cpuinfo_power"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| HeaderError::FileRead {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(HeaderRecord::fields(
            "cpuinfo_power",
            parse_cpuinfo_power(&content),
        ))
    }
}
