//! Static host description emitted once, before the first sample.
//!
//! Each header section comes from its own [`HeaderProducer`]. Producers only
//! gather data; [`generate_header`] records their output into the frontend so
//! that a failing source costs one section and never the whole header.

pub mod cgroup;
pub mod cmonitor;
pub mod cpuinfo;
pub mod error;
pub mod identity;
pub mod lscpu;
pub mod meminfo;
pub mod os_release;
pub mod proc_version;

use tracing::{debug, warn};

use self::{
    cgroup::CgroupConfigProducer,
    cmonitor::CmonitorInfoProducer,
    cpuinfo::{CpuInfoPowerProducer, CpuInfoProducer},
    error::HeaderResult,
    identity::IdentityProducer,
    lscpu::LscpuProducer,
    meminfo::MemInfoProducer,
    os_release::OsReleaseProducer,
    proc_version::ProcVersionProducer,
};
use crate::core::output::{Labels, OutputFrontend};

/// Value of a header field.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Long(i64),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderField {
    pub name: String,
    pub value: HeaderValue,
}

/// Ordered list of fields with typed push helpers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderFields(Vec<HeaderField>);

impl HeaderFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, name: &str, value: impl Into<String>) {
        self.0.push(HeaderField {
            name: name.to_owned(),
            value: HeaderValue::Str(value.into()),
        });
    }

    pub fn push_long(&mut self, name: &str, value: i64) {
        self.0.push(HeaderField {
            name: name.to_owned(),
            value: HeaderValue::Long(value),
        });
    }

    pub fn push_double(&mut self, name: &str, value: f64) {
        self.0.push(HeaderField {
            name: name.to_owned(),
            value: HeaderValue::Double(value),
        });
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.0.iter()
    }

    fn record(&self, out: &mut OutputFrontend) {
        for field in &self.0 {
            match &field.value {
                HeaderValue::Str(s) => out.pstring(&field.name, s),
                HeaderValue::Long(v) => out.plong(&field.name, *v),
                HeaderValue::Double(v) => out.pdouble(&field.name, *v),
            }
        }
    }
}

/// Content of a header section.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderBody {
    Fields(HeaderFields),
    Subsections(Vec<(String, HeaderFields)>),
}

/// One header section as gathered by a producer.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRecord {
    pub section: &'static str,
    pub body: HeaderBody,
}

impl HeaderRecord {
    pub fn fields(section: &'static str, fields: HeaderFields) -> Self {
        Self {
            section,
            body: HeaderBody::Fields(fields),
        }
    }

    pub fn subsections(section: &'static str, subsections: Vec<(String, HeaderFields)>) -> Self {
        Self {
            section,
            body: HeaderBody::Subsections(subsections),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.body {
            HeaderBody::Fields(f) => f.is_empty(),
            HeaderBody::Subsections(s) => s.is_empty(),
        }
    }

    /// Field lookup for flat sections.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        match &self.body {
            HeaderBody::Fields(f) => f.get(name),
            HeaderBody::Subsections(_) => None,
        }
    }

    /// Writes the section into the sample being built.
    pub fn record(&self, out: &mut OutputFrontend) {
        out.section_start(self.section);
        match &self.body {
            HeaderBody::Fields(fields) => fields.record(out),
            HeaderBody::Subsections(subs) => {
                for (name, fields) in subs {
                    out.subsection_start(name, Labels::new());
                    fields.record(out);
                    out.subsection_end();
                }
            }
        }
        out.section_end();
    }
}

/// A source of one header section.
#[async_trait::async_trait]
pub trait HeaderProducer: Send + Sync {
    /// Section name, used in logs.
    fn name(&self) -> &'static str;

    async fn produce(&self) -> HeaderResult<HeaderRecord>;
}

/// Everything the `cmonitor` header section reports about this run.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub command: String,
    pub sample_interval_seconds: u64,
    pub num_samples: u64,
}

/// The producers of a regular run, in emission order.
pub fn default_producers(run: RunInfo) -> Vec<Box<dyn HeaderProducer>> {
    vec![
        Box::new(IdentityProducer::default()),
        Box::new(CmonitorInfoProducer::new(run)),
        Box::new(OsReleaseProducer::default()),
        Box::new(ProcVersionProducer::default()),
        Box::new(CgroupConfigProducer::default()),
        Box::new(CpuInfoProducer::default()),
        Box::new(CpuInfoPowerProducer::default()),
        Box::new(MemInfoProducer::default()),
        Box::new(LscpuProducer::default()),
    ]
}

/// Records every available header section; returns how many were recorded.
pub async fn generate_header(
    out: &mut OutputFrontend,
    producers: &[Box<dyn HeaderProducer>],
) -> usize {
    let mut recorded = 0;
    for producer in producers {
        match producer.produce().await {
            Ok(record) if record.is_empty() => {
                debug!("Header section {} is empty, skipped", producer.name());
            }
            Ok(record) => {
                record.record(out);
                recorded += 1;
            }
            Err(e) => warn!("Header section {} skipped: {}", producer.name(), e),
        }
    }
    debug!("Header holds {} sections", recorded);
    recorded
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::{error::HeaderError, *};

    struct Fixed(HeaderRecord);

    #[async_trait::async_trait]
    impl HeaderProducer for Fixed {
        fn name(&self) -> &'static str {
            self.0.section
        }

        async fn produce(&self) -> HeaderResult<HeaderRecord> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl HeaderProducer for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn produce(&self) -> HeaderResult<HeaderRecord> {
            Err(HeaderError::MissingField {
                field: "x".into(),
                location: "nowhere".into(),
            })
        }
    }

    fn flat(section: &'static str, name: &str, value: &str) -> HeaderRecord {
        let mut fields = HeaderFields::new();
        fields.push_str(name, value);
        HeaderRecord::fields(section, fields)
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failing_producer_is_skipped() {
        let producers: Vec<Box<dyn HeaderProducer>> = vec![
            Box::new(Fixed(flat("identity", "hostname", "h1"))),
            Box::new(Broken),
            Box::new(Fixed(HeaderRecord::fields("empty", HeaderFields::new()))),
            Box::new(Fixed(flat("os_release", "name", "Debian"))),
        ];
        let mut out = OutputFrontend::new();

        assert_eq!(generate_header(&mut out, &producers).await, 2);

        let names: Vec<_> = out.tree().sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["identity", "os_release"]);
        assert!(logs_contain("Header section broken skipped"));
    }

    #[test]
    fn test_record_with_subsections() {
        let mut proc0 = HeaderFields::new();
        proc0.push_long("core_id", 0);
        proc0.push_double("cpu_mhz", 2200.5);
        let mut proc1 = HeaderFields::new();
        proc1.push_long("core_id", 1);
        let record = HeaderRecord::subsections(
            "cpuinfo",
            vec![("proc0".into(), proc0), ("proc1".into(), proc1)],
        );

        let mut out = OutputFrontend::new();
        record.record(&mut out);

        let section = out.tree().section("cpuinfo").unwrap();
        let subs = section.content.children();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].name, "proc0");
        assert_eq!(subs[0].content.measurements()[1].raw_value(), "2200.500000");
        assert_eq!(out.measurement_count(), 3);
    }

    #[test]
    fn test_default_producer_order() {
        let producers = default_producers(RunInfo {
            command: "cmonitor".into(),
            sample_interval_seconds: 60,
            num_samples: 0,
        });
        let names: Vec<_> = producers.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "identity",
                "cmonitor",
                "os_release",
                "proc_version",
                "cgroup_config",
                "cpuinfo",
                "cpuinfo_power",
                "proc_meminfo",
                "lscpu"
            ]
        );
    }
}
