//! `os_release` header section, read from `/etc/os-release`.

use std::path::PathBuf;

use super::{
    error::{HeaderError, HeaderResult},
    HeaderFields, HeaderProducer, HeaderRecord,
};

const OS_RELEASE: &str = "/etc/os-release";

/// Keys kept from the file and the field they become.
const KEYS: &[(&str, &str)] = &[
    ("NAME", "name"),
    ("VERSION", "version"),
    ("PRETTY_NAME", "pretty_name"),
    ("VERSION_ID", "version_id"),
];

pub struct OsReleaseProducer {
    path: PathBuf,
}

impl Default for OsReleaseProducer {
    fn default() -> Self {
        Self::with_path(OS_RELEASE)
    }
}

impl OsReleaseProducer {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Extracts the known keys from os-release content, unquoting values.
pub fn parse_os_release(content: &str) -> HeaderFields {
    let mut fields = HeaderFields::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if let Some((_, name)) = KEYS.iter().find(|(k, _)| *k == key.trim()) {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            fields.push_str(name, value);
        }
    }
    fields
}

#[async_trait::async_trait]
impl HeaderProducer for OsReleaseProducer {
    fn name(&self) -> &'static str {
        "os_release"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| HeaderError::FileRead {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(HeaderRecord::fields("os_release", parse_os_release(&content)))
    }
}
