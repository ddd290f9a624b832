//! `cmonitor` header section: how this collector was started.

use nix::unistd::{geteuid, User};

use super::{error::HeaderResult, HeaderFields, HeaderProducer, HeaderRecord, RunInfo};

pub struct CmonitorInfoProducer {
    run: RunInfo,
}

impl CmonitorInfoProducer {
    pub fn new(run: RunInfo) -> Self {
        Self { run }
    }
}

fn clamp(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl HeaderProducer for CmonitorInfoProducer {
    fn name(&self) -> &'static str {
        "cmonitor"
    }

    async fn produce(&self) -> HeaderResult<HeaderRecord> {
        let mut fields = HeaderFields::new();
        fields.push_str("command", self.run.command.as_str());
        fields.push_long(
            "sample_interval_seconds",
            clamp(self.run.sample_interval_seconds),
        );
        fields.push_long("sample_num", clamp(self.run.num_samples));
        fields.push_str("version", env!("CARGO_PKG_VERSION"));

        let uid = geteuid();
        match User::from_uid(uid) {
            Ok(Some(user)) => {
                fields.push_str("username", user.name);
                fields.push_long("userid", i64::from(uid.as_raw()));
            }
            _ => fields.push_str("username", "unknown"),
        }

        fields.push_long("pid", i64::from(std::process::id()));

        Ok(HeaderRecord::fields("cmonitor", fields))
    }
}

#[cfg(test)]
mod tests {
    use super::{super::HeaderValue, *};

    #[tokio::test]
    async fn test_run_information() {
        let producer = CmonitorInfoProducer::new(RunInfo {
            command: "cmonitor --config /tmp/c.toml".into(),
            sample_interval_seconds: 30,
            num_samples: 10,
        });
        let record = producer.produce().await.unwrap();

        assert_eq!(
            record.get("command"),
            Some(&HeaderValue::Str("cmonitor --config /tmp/c.toml".into()))
        );
        assert_eq!(
            record.get("sample_interval_seconds"),
            Some(&HeaderValue::Long(30))
        );
        assert_eq!(record.get("sample_num"), Some(&HeaderValue::Long(10)));
        assert_eq!(
            record.get("pid"),
            Some(&HeaderValue::Long(i64::from(std::process::id())))
        );
        assert!(record.get("username").is_some());
    }
}
