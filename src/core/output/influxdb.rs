//! InfluxDB line protocol output.
//!
//! Every non-empty measurement group of a sample becomes one point:
//!
//! ```text
//! <measurement>[,<tagset>] <field>=<value>[,<field>=<value>...] <timestamp_ns>
//! ```
//!
//! The tag-set identifies the host and is derived once from the header sample.
//! See <https://docs.influxdata.com/influxdb/v1.7/write_protocols/line_protocol_tutorial/>.

use std::time::Duration;

use once_cell::unsync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    backoff::Backoff,
    error::OutputError,
    measurement::Measurement,
    sink::{MetricSink, Tick},
    transport::{resolve, HttpLineTransport, LineTransport, UdpLineTransport},
    tree::{LeafGroup, LeafLevel, SampleTree},
};
use crate::config::output::{InfluxDbOutputConfig, InfluxProtocol};

/// Characters that would need escaping in measurement, tag and field names.
const SPECIAL_CHARS: &[char] = &[',', '=', ' ', '"'];

/// Header fields turned into tags: (section, measurement, tag key).
const TAG_SOURCES: &[(&str, &str, &str)] = &[
    ("identity", "hostname", "hostname"),
    ("identity", "all_ip_addresses", "all_ip_addresses"),
    ("os_release", "name", "os_name"),
    ("os_release", "pretty_name", "os_pretty_name"),
    ("cgroup_config", "name", "cgroup_name"),
    ("lscpu", "model_name", "cpu_model_name"),
];

/// True when `s` contains a character with special meaning in line protocol.
pub fn contains_char_to_escape(s: &str) -> bool {
    s.contains(SPECIAL_CHARS)
}

/// Escapes commas, equal signs and spaces in a tag value.
pub fn escape_tag_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escapes double quotes inside a string field value.
pub fn escape_field_string(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Builds the `key=value,key=value` tag-set from a header sample.
///
/// Fields missing from the header are left out.
pub fn derive_tagset(header: &SampleTree) -> String {
    let mut tags = Vec::with_capacity(TAG_SOURCES.len());

    for section in header.sections() {
        for (source, field, key) in TAG_SOURCES.iter().filter(|(s, ..)| *s == section.name) {
            assert!(
                !contains_char_to_escape(key),
                "invalid InfluxDB tag key {:?}",
                key
            );
            match section.value_of(field) {
                Some(value) if !value.is_empty() => {
                    let value = if *field == "all_ip_addresses" {
                        // A comma would read as a tag separator.
                        value.replace(',', " ")
                    } else {
                        value.to_owned()
                    };
                    tags.push(format!("{}={}", key, escape_tag_value(&value)));
                }
                _ => debug!("Header field {}.{} missing, no '{}' tag", source, field, key),
            }
        }
    }

    tags.join(",")
}

/// Measurement name used for a leaf group.
///
/// Nested groups are named after themselves twice (`eth0` becomes
/// `eth0_eth0`); existing dashboards query these names.
pub fn leaf_measurement_name(group: &LeafGroup<'_>) -> String {
    match group.level {
        LeafLevel::Section => group.section.to_owned(),
        LeafLevel::Subsection | LeafLevel::SubSubsection => {
            format!("{}_{}", group.name, group.name)
        }
    }
}

/// Appends one point to `out`.
///
/// Panics when the measurement or a field name contains a character that
/// would need escaping: names are constants chosen by the collectors.
pub fn format_line(
    out: &mut String,
    name: &str,
    tagset: &str,
    measurements: &[Measurement],
    timestamp_ns: u64,
) {
    assert!(
        !contains_char_to_escape(name),
        "invalid InfluxDB measurement name {:?}",
        name
    );
    out.push_str(name);
    if !tagset.is_empty() {
        out.push(',');
        out.push_str(tagset);
    }
    out.push(' ');

    for (n, m) in measurements.iter().enumerate() {
        assert!(
            !contains_char_to_escape(m.name()),
            "invalid InfluxDB field name {:?}",
            m.name()
        );
        if n > 0 {
            out.push(',');
        }
        out.push_str(m.name());
        out.push('=');
        if m.is_numeric() {
            out.push_str(m.raw_value());
        } else {
            out.push('"');
            out.push_str(&escape_field_string(m.raw_value()));
            out.push('"');
        }
    }

    out.push(' ');
    out.push_str(&timestamp_ns.to_string());
}

/// Sends every sample to InfluxDB through a [`LineTransport`].
pub struct InfluxDbSink {
    transport: Box<dyn LineTransport>,
    tagset: OnceCell<String>,
    payload: String,
}

impl InfluxDbSink {
    pub fn new(transport: Box<dyn LineTransport>) -> Self {
        Self {
            transport,
            tagset: OnceCell::new(),
            payload: String::with_capacity(4096),
        }
    }

    /// Resolves the configured host and sets up the transport.
    pub fn from_config(config: &InfluxDbOutputConfig) -> Result<Self, OutputError> {
        let addr = resolve(&config.host, config.port)?;
        let backoff = Backoff::new(
            Duration::from_secs(config.reconnect_initial_seconds),
            Duration::from_secs(config.reconnect_max_seconds),
            2.0,
        );

        let transport: Box<dyn LineTransport> = match config.protocol {
            InfluxProtocol::Http => Box::new(HttpLineTransport::new(
                addr,
                &config.host,
                &config.database,
                Duration::from_millis(config.timeout_ms),
                backoff,
            )),
            InfluxProtocol::Udp => Box::new(UdpLineTransport::new(addr, backoff)),
        };

        info!(
            "InfluxDB output enabled: {} (database {})",
            transport.endpoint(),
            config.database
        );
        Ok(Self::new(transport))
    }

    /// The cached tag-set, once a header has been pushed.
    pub fn tagset(&self) -> Option<&str> {
        self.tagset.get().map(String::as_str)
    }

    /// Renders the lines of a sample without sending them.
    pub fn render(&mut self, tree: &SampleTree, timestamp_ns: u64) -> &str {
        self.payload.clear();
        let tagset = self.tagset.get().map(String::as_str).unwrap_or("");
        for group in tree.leaf_groups() {
            if !self.payload.is_empty() {
                self.payload.push('\n');
            }
            let name = leaf_measurement_name(&group);
            format_line(
                &mut self.payload,
                &name,
                tagset,
                group.measurements,
                timestamp_ns,
            );
        }
        &self.payload
    }
}

impl MetricSink for InfluxDbSink {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    fn push(&mut self, tree: &SampleTree, tick: &Tick) -> Result<(), OutputError> {
        if tick.is_header() {
            if self.tagset.get().is_some() {
                warn!("Ignoring header push: InfluxDB tag-set already derived");
                return Ok(());
            }
            let tagset = self.tagset.get_or_init(|| derive_tagset(tree));
            debug!("Generated tag-set for InfluxDB: {}", tagset);
            return Ok(());
        }

        if self.render(tree, tick.timestamp_ns).is_empty() {
            return Ok(());
        }

        debug!(
            "Pushing to InfluxDB {} measurements for timestamp {}",
            tree.measurement_count(),
            tick.timestamp_ns
        );
        self.transport.send(&self.payload)
    }

    fn close(&mut self) -> Result<(), OutputError> {
        self.transport.close();
        Ok(())
    }
}
