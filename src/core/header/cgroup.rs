//! `cgroup_config` header section: the control group the collector runs in.

use std::path::PathBuf;

use super::{
    error::{HeaderError, HeaderResult},
    HeaderFields, HeaderProducer, HeaderRecord,
};

const PROC_SELF_CGROUP: &str = "/proc/self/cgroup";

pub struct CgroupConfigProducer {
    path: PathBuf,
}

impl Default for CgroupConfigProducer {
    fn default() -> Self {
        Self::with_path(PROC_SELF_CGROUP)
    }
}

impl CgroupConfigProducer {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Cgroup path and hierarchy version from `/proc/<pid>/cgroup` content.
///
/// The unified (v2) entry wins; on v1 hosts the `cpu` controller entry is
/// used, falling back to the first entry.
pub fn parse_cgroup(content: &str) -> Option<(&str, &'static str)> {
    let entries: Vec<(&str, &str, &str)> = content
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            Some((parts.next()?, parts.next()?, parts.next()?))
        })
        .collect();

    if let Some((_, _, path)) = entries.iter().find(|(id, ctrl, _)| *id == "0" && ctrl.is_empty()) {
        return Some((*path, "v2"));
    }
    entries
        .iter()
        .find(|(_, ctrl, _)| ctrl.split(',').any(|c| c == "cpu"))
        .or_else(|| entries.first())
        .map(|(_, _, path)| (*path, "v1"))
}

#[async_trait::async_trait]
impl HeaderProducer for CgroupConfigProducer {
    fn name(&self) -> &'static str {
        "cgroup_config"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let location = self.path.display().to_string();
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| HeaderError::FileRead {
                path: location.clone(),
                source,
            })?;

        let (name, version) = parse_cgroup(&content).ok_or(HeaderError::MissingField {
            field: "cgroup path".to_string(),
            location,
        })?;

        let mut fields = HeaderFields::new();
        fields.push_str("name", name);
        fields.push_str("version", version);
        Ok(HeaderRecord::fields("cgroup_config", fields))
    }
}
