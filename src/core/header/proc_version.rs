//! `proc_version` header section: the kernel banner.

use std::path::PathBuf;

use super::{
    error::{HeaderError, HeaderResult},
    HeaderFields, HeaderProducer, HeaderRecord,
};

const PROC_VERSION: &str = "/proc/version";

pub struct ProcVersionProducer {
    path: PathBuf,
}

impl Default for ProcVersionProducer {
    fn default() -> Self {
        Self::with_path(PROC_VERSION)
    }
}

impl ProcVersionProducer {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl HeaderProducer for ProcVersionProducer {
    fn name(&self) -> &'static str {
        "proc_version"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| HeaderError::FileRead {
                path: self.path.display().to_string(),
                source,
            })?;

        let line = content.lines().next().ok_or_else(|| HeaderError::MissingField {
            field: "version".to_string(),
            location: self.path.display().to_string(),
        })?;

        // Compiler strings embed double quotes.
        let mut fields = HeaderFields::new();
        fields.push_str("version", line.replace('"', "|"));
        Ok(HeaderRecord::fields("proc_version", fields))
    }
}

#[cfg(test)]
mod tests {
    use super::{super::HeaderValue, *};

    #[tokio::test]
    async fn test_kernel_banner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version");
        std::fs::write(
            &path,
            "Linux version 6.1.0 (gcc \"Debian 12.2.0\") #1 SMP\n",
        )
        .unwrap();

        let record = ProcVersionProducer::with_path(&path).produce().await.unwrap();
        assert_eq!(
            record.get("version"),
            Some(&HeaderValue::Str(
                "Linux version 6.1.0 (gcc |Debian 12.2.0|) #1 SMP".into()
            ))
        );
    }

    #[tokio::test]
    async fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version");
        std::fs::write(&path, "").unwrap();

        let err = ProcVersionProducer::with_path(&path)
            .produce()
            .await
            .unwrap_err();
        assert!(matches!(err, HeaderError::MissingField { .. }));
    }
}
