//! `proc_meminfo` header section: the memory sizes of `/proc/meminfo` that
//! never change at runtime.

use std::path::PathBuf;

use super::{
    error::{HeaderError, HeaderResult},
    HeaderFields, HeaderProducer, HeaderRecord,
};

const PROC_MEMINFO: &str = "/proc/meminfo";

/// Keys kept in the header, under their kernel names.
const STATIC_KEYS: &[&str] = &["MemTotal", "HugePages_Total", "Hugepagesize"];

pub struct MemInfoProducer {
    path: PathBuf,
}

impl Default for MemInfoProducer {
    fn default() -> Self {
        Self::with_path(PROC_MEMINFO)
    }
}

impl MemInfoProducer {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Picks the static entries out of `Key:   value [kB]` lines, in file order.
///
/// Values are kept in the unit the kernel prints. `MemTotal` is required.
pub fn parse_meminfo(content: &str, location: &str) -> HeaderResult<HeaderFields> {
    let mut fields = HeaderFields::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if !STATIC_KEYS.contains(&key) {
            continue;
        }
        if let Some(v) = value
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<i64>().ok())
        {
            fields.push_long(key, v);
        }
    }

    if fields.get("MemTotal").is_none() {
        return Err(HeaderError::MissingField {
            field: "MemTotal".to_string(),
            location: location.to_string(),
        });
    }
    Ok(fields)
}

#[async_trait::async_trait]
impl HeaderProducer for MemInfoProducer {
    fn name(&self) -> &'static str {
        "proc_meminfo"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let location = self.path.display().to_string();
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| HeaderError::FileRead {
                path: location.clone(),
                source,
            })?;
        Ok(HeaderRecord::fields(
            "proc_meminfo",
            parse_meminfo(&content, &location)?,
        ))
    }
}
