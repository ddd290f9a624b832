//! JSON document output.
//!
//! The document has the shape
//!
//! ```text
//! { "header": { <sections> }, "samples": [ { <sections> }, { <sections> }, ... ] }
//! ```
//!
//! The header is written once, then every regular tick appends one object to
//! the `samples` array. The array stays open while the collector runs and is
//! only terminated by [`MetricSink::close`], so a file left behind by a killed
//! process lacks its final `]}`.

use std::{
    convert::Infallible,
    fs::File,
    io::{self, BufWriter, Write},
};

use tracing::{debug, info, warn};

use super::{
    error::OutputError,
    measurement::Measurement,
    sink::{MetricSink, Tick},
    tree::{SampleTree, TreeVisitor},
};
use crate::config::output::JsonOutputConfig;

/// Indentation added per nesting level in pretty mode.
pub const JSON_INDENT: &str = "    ";

/// Target name that writes the document to standard output.
pub const STDOUT_TARGET: &str = "stdout";

/// Target name that disables JSON output.
pub const DISABLED_TARGET: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentState {
    NotStarted,
    InSamples,
    Closed,
}

/// Streams sample trees into a single JSON document.
pub struct JsonSink {
    writer: Box<dyn Write + Send>,
    target: String,
    pretty: bool,
    state: DocumentState,
    samples: u64,
    buffer: String,
}

impl JsonSink {
    pub fn new(writer: Box<dyn Write + Send>, target: impl Into<String>, pretty: bool) -> Self {
        Self {
            writer,
            target: target.into(),
            pretty,
            state: DocumentState::NotStarted,
            samples: 0,
            buffer: String::with_capacity(4096),
        }
    }

    /// Opens the configured target.
    ///
    /// Returns `Ok(None)` when JSON output is disabled.
    pub fn from_config(config: &JsonOutputConfig) -> Result<Option<Self>, OutputError> {
        match config.path.as_str() {
            DISABLED_TARGET => {
                info!("JSON output disabled (path = {})", DISABLED_TARGET);
                Ok(None)
            }
            STDOUT_TARGET => {
                info!("Writing JSON output to stdout");
                Ok(Some(Self::new(
                    Box::new(io::stdout()),
                    STDOUT_TARGET,
                    config.pretty,
                )))
            }
            prefix => {
                let path = json_file_name(prefix);
                let file = File::create(&path).map_err(|source| OutputError::JsonOpen {
                    path: path.clone(),
                    source,
                })?;
                info!("Opened output JSON file '{}'", path);
                Ok(Some(Self::new(
                    Box::new(BufWriter::new(file)),
                    path,
                    config.pretty,
                )))
            }
        }
    }

    /// Where the document is written.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of regular samples written so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    fn newline(&mut self) {
        if self.pretty {
            self.buffer.push('\n');
        }
    }

    fn indent(&mut self, level: usize) {
        push_indent(&mut self.buffer, self.pretty, level);
    }

    fn open_document(&mut self) {
        self.buffer.push('{');
        self.newline();
    }

    fn open_samples(&mut self) {
        self.indent(1);
        self.buffer.push_str("\"samples\": [");
        self.newline();
        self.state = DocumentState::InSamples;
    }

    fn write_header(&mut self, tree: &SampleTree) {
        self.open_document();
        self.indent(1);
        self.buffer.push_str("\"header\": {");
        self.newline();
        self.write_sections(tree, 2);
        self.indent(1);
        self.buffer.push_str("},");
        self.newline();
        self.open_samples();
    }

    fn write_sample(&mut self, tree: &SampleTree) {
        if self.state == DocumentState::NotStarted {
            self.open_document();
            self.open_samples();
        }
        if self.samples > 0 {
            self.buffer.push(',');
            self.newline();
        }
        self.indent(2);
        self.buffer.push('{');
        self.newline();
        self.write_sections(tree, 3);
        self.indent(2);
        self.buffer.push('}');
        self.samples += 1;
    }

    fn write_sections(&mut self, tree: &SampleTree, base: usize) {
        let mut layout = Layout {
            out: &mut self.buffer,
            pretty: self.pretty,
            base,
        };
        if let Err(never) = tree.walk(&mut layout) {
            match never {}
        }
    }

    fn write_buffer(&mut self) -> Result<(), OutputError> {
        let result = self
            .writer
            .write_all(self.buffer.as_bytes())
            .map_err(OutputError::io("json"));
        self.buffer.clear();
        result
    }
}

impl MetricSink for JsonSink {
    fn name(&self) -> &'static str {
        "json"
    }

    fn push(&mut self, tree: &SampleTree, tick: &Tick) -> Result<(), OutputError> {
        match (self.state, tick.is_header()) {
            (DocumentState::Closed, _) => {
                return Err(OutputError::Io {
                    sink: "json",
                    source: io::Error::new(io::ErrorKind::Other, "JSON document already closed"),
                });
            }
            (DocumentState::InSamples, true) => {
                warn!("Ignoring header push: JSON document already holds samples");
                return Ok(());
            }
            _ => {}
        }

        let (state, samples) = (self.state, self.samples);
        if tick.is_header() {
            self.write_header(tree);
        } else {
            self.write_sample(tree);
        }

        debug!(
            "Writing {} measurements on the JSON output",
            tree.measurement_count()
        );
        // A failed write leaves the document where it was, so the next push
        // starts from the same position.
        if let Err(e) = self.write_buffer() {
            self.state = state;
            self.samples = samples;
            return Err(e);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush().map_err(OutputError::io("json"))
    }

    fn close(&mut self) -> Result<(), OutputError> {
        if self.state == DocumentState::InSamples {
            self.newline();
            self.indent(1);
            self.buffer.push(']');
            self.newline();
            self.buffer.push_str("}\n");
            self.write_buffer()?;
            debug!(
                "Closed JSON document '{}' after {} samples",
                self.target, self.samples
            );
        }
        self.state = DocumentState::Closed;
        self.flush()
    }
}

/// File name for a JSON output prefix: `.json` is appended when missing.
pub fn json_file_name(prefix: &str) -> String {
    if prefix.ends_with(".json") {
        prefix.to_owned()
    } else {
        format!("{}.json", prefix)
    }
}

fn push_indent(out: &mut String, pretty: bool, level: usize) {
    if pretty {
        for _ in 0..level {
            out.push_str(JSON_INDENT);
        }
    }
}

/// Renders the sections of a tree as JSON members starting at `base` indent.
struct Layout<'a> {
    out: &'a mut String,
    pretty: bool,
    base: usize,
}

impl Layout<'_> {
    fn newline(&mut self) {
        if self.pretty {
            self.out.push('\n');
        }
    }
}

impl TreeVisitor for Layout<'_> {
    type Error = Infallible;

    fn open_node(&mut self, name: &str, depth: usize) -> Result<(), Infallible> {
        push_indent(self.out, self.pretty, self.base + depth);
        self.out.push('"');
        self.out.push_str(name);
        self.out.push_str("\": {");
        self.newline();
        Ok(())
    }

    fn measurements(&mut self, measurements: &[Measurement], depth: usize) -> Result<(), Infallible> {
        let level = self.base + depth + 1;
        for (n, m) in measurements.iter().enumerate() {
            push_indent(self.out, self.pretty, level);
            self.out.push('"');
            self.out.push_str(m.name());
            self.out.push_str("\": ");
            self.out.push_str(m.json_value());
            if n + 1 < measurements.len() {
                self.out.push(',');
            }
            self.newline();
        }
        Ok(())
    }

    fn close_node(&mut self, depth: usize, last: bool) -> Result<(), Infallible> {
        push_indent(self.out, self.pretty, self.base + depth);
        self.out.push('}');
        if !last {
            self.out.push(',');
        }
        self.newline();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::core::output::{
        sink::TickKind,
        testing::{sample_tick, SharedBuffer},
        tree::Labels,
        OutputFrontend,
    };

    fn header_tick() -> Tick {
        Tick {
            kind: TickKind::Header,
            timestamp_ns: 0,
        }
    }

    fn frontend(pretty: bool) -> (OutputFrontend, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let mut out = OutputFrontend::new();
        out.add_sink(Box::new(JsonSink::new(
            Box::new(buffer.clone()),
            "memory",
            pretty,
        )));
        (out, buffer)
    }

    fn cpu_sample(out: &mut OutputFrontend) {
        out.section_start("cpu");
        out.plong("user", 42);
        out.pdouble("idle", 3.5);
        out.section_end();
    }

    fn count_leaves(v: &Value) -> usize {
        match v {
            Value::Object(map) => map.values().map(count_leaves).sum(),
            _ => 1,
        }
    }

    #[test]
    fn test_compact_sample_layout() {
        let buffer = SharedBuffer::default();
        let mut sink = JsonSink::new(Box::new(buffer.clone()), "memory", false);

        let mut out = OutputFrontend::new();
        cpu_sample(&mut out);
        sink.push(out.tree(), &sample_tick()).unwrap();

        assert_eq!(
            buffer.contents(),
            "{\"samples\": [{\"cpu\": {\"user\": 42,\"idle\": 3.500000}}"
        );
    }

    #[test]
    fn test_pretty_sample_layout() {
        let (mut out, buffer) = frontend(true);
        cpu_sample(&mut out);
        out.push_tick(sample_tick()).unwrap();
        out.close().unwrap();

        let expected = "{\n    \"samples\": [\n        {\n            \"cpu\": {\n                \"user\": 42,\n                \"idle\": 3.500000\n            }\n        }\n    ]\n}\n";
        assert_eq!(buffer.contents(), expected);
    }

    #[test]
    fn test_header_then_samples_form_valid_document() {
        for pretty in [false, true] {
            let (mut out, buffer) = frontend(pretty);

            out.section_start("identity");
            out.pstring("hostname", "h1");
            out.section_end();
            out.push_tick(header_tick()).unwrap();

            for i in 0..3 {
                out.section_start("timestamp");
                out.plong("sample_index", i);
                out.section_end();
                cpu_sample(&mut out);
                out.push_tick(sample_tick()).unwrap();
            }
            out.close().unwrap();

            let doc: Value = serde_json::from_str(&buffer.contents()).expect("valid JSON");
            assert_eq!(doc["header"]["identity"]["hostname"], "h1");
            let samples = doc["samples"].as_array().unwrap();
            assert_eq!(samples.len(), 3);
            assert_eq!(samples[2]["timestamp"]["sample_index"], 2);
            assert_eq!(samples[0]["cpu"]["idle"], 3.5);
        }
    }

    #[test]
    fn test_leaf_count_matches_recorded_measurements() {
        let (mut out, buffer) = frontend(false);

        out.section_start("cgroup_cpu");
        out.subsection_start("per_cpu", Labels::new());
        for cpu in 0..4 {
            out.subsubsection_start(&format!("cpu{}", cpu), Labels::new());
            out.pdouble("user", 0.25 * cpu as f64);
            out.pdouble("sys", 0.1);
            out.pstring("state", "on\"line\"");
            out.subsubsection_end();
        }
        out.subsection_end();
        out.subsection_start("totals", Labels::new());
        out.plong("throttled", 7);
        out.subsection_end();
        out.section_end();
        out.section_start("load");
        out.pdouble("avg1", 0.5);
        out.section_end();

        let recorded = out.tree().measurement_count();
        out.push_tick(sample_tick()).unwrap();
        out.close().unwrap();

        let doc: Value = serde_json::from_str(&buffer.contents()).unwrap();
        let sample = &doc["samples"][0];
        assert_eq!(count_leaves(sample), recorded);
        assert_eq!(recorded, 14);
        assert_eq!(sample["cgroup_cpu"]["per_cpu"]["cpu3"]["user"], 0.75);
        assert_eq!(sample["cgroup_cpu"]["per_cpu"]["cpu1"]["state"], "on\"line\"");
        assert_eq!(sample["cgroup_cpu"]["totals"]["throttled"], 7);
    }

    #[test]
    fn test_section_with_empty_subsections_is_object() {
        let (mut out, buffer) = frontend(false);
        out.section_start("network");
        out.subsection_start("eth0", Labels::new());
        out.subsection_end();
        out.subsection_start("eth1", Labels::new());
        out.subsection_end();
        out.section_end();
        out.push_tick(sample_tick()).unwrap();

        let text = buffer.contents();
        assert!(text.ends_with("{\"network\": {\"eth0\": {},\"eth1\": {}}}"));
    }

    #[test]
    fn test_second_header_is_ignored() {
        let (mut out, buffer) = frontend(false);
        out.section_start("identity");
        out.pstring("hostname", "h1");
        out.section_end();
        out.push_tick(header_tick()).unwrap();
        let after_first = buffer.contents();

        out.section_start("identity");
        out.pstring("hostname", "h2");
        out.section_end();
        out.push_tick(header_tick()).unwrap();

        assert_eq!(buffer.contents(), after_first);
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_writes() {
        let buffer = SharedBuffer::default();
        let mut sink = JsonSink::new(Box::new(buffer.clone()), "memory", false);
        sink.push(&SampleTree::new(), &sample_tick()).unwrap();
        sink.close().unwrap();
        let closed = buffer.contents();
        sink.close().unwrap();
        assert_eq!(buffer.contents(), closed);
        assert_eq!(closed, "{\"samples\": [{}]}\n");

        assert!(sink.push(&SampleTree::new(), &sample_tick()).is_err());
    }

    /// Writer whose first `fails` writes return an error.
    #[derive(Clone)]
    struct FlakyWriter {
        fails: usize,
        inner: SharedBuffer,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fails > 0 {
                self.fails -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    #[test]
    fn test_failed_write_keeps_document_position() {
        let buffer = SharedBuffer::default();
        let writer = FlakyWriter {
            fails: 1,
            inner: buffer.clone(),
        };
        let mut sink = JsonSink::new(Box::new(writer), "memory", false);

        let mut out = OutputFrontend::new();
        cpu_sample(&mut out);
        assert!(sink.push(out.tree(), &sample_tick()).is_err());
        assert_eq!(sink.samples(), 0);
        assert_eq!(buffer.contents(), "");

        sink.push(out.tree(), &sample_tick()).unwrap();
        sink.close().unwrap();

        let doc: Value = serde_json::from_str(&buffer.contents()).expect("valid JSON");
        let samples = doc["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0]["cpu"]["user"], 42);
        assert_eq!(sink.samples(), 1);
    }

    #[test]
    fn test_failed_header_write_is_retried() {
        let buffer = SharedBuffer::default();
        let writer = FlakyWriter {
            fails: 1,
            inner: buffer.clone(),
        };
        let mut sink = JsonSink::new(Box::new(writer), "memory", false);

        let mut header = OutputFrontend::new();
        header.section_start("identity");
        header.pstring("hostname", "h1");
        header.section_end();
        assert!(sink.push(header.tree(), &header_tick()).is_err());
        sink.push(header.tree(), &header_tick()).unwrap();
        sink.close().unwrap();

        let doc: Value = serde_json::from_str(&buffer.contents()).expect("valid JSON");
        assert_eq!(doc["header"]["identity"]["hostname"], "h1");
        assert!(doc["samples"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_json_file_name() {
        assert_eq!(json_file_name("out"), "out.json");
        assert_eq!(json_file_name("/tmp/run.json"), "/tmp/run.json");
        assert_eq!(json_file_name("a.js"), "a.js.json");
    }

    #[test]
    fn test_from_config_targets() {
        let disabled = JsonOutputConfig {
            path: DISABLED_TARGET.into(),
            pretty: false,
        };
        assert!(JsonSink::from_config(&disabled).unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("run").to_string_lossy().to_string();
        let cfg = JsonOutputConfig {
            path: prefix.clone(),
            pretty: true,
        };
        let mut sink = JsonSink::from_config(&cfg).unwrap().expect("file sink");
        assert_eq!(sink.target(), format!("{}.json", prefix));

        sink.push(&SampleTree::new(), &sample_tick()).unwrap();
        sink.close().unwrap();
        let written = std::fs::read_to_string(sink.target()).unwrap();
        let doc: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(doc["samples"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_from_config_unwritable_path() {
        let cfg = JsonOutputConfig {
            path: "/nonexistent-dir/for/sure/out".into(),
            pretty: false,
        };
        let err = JsonSink::from_config(&cfg).err().expect("open must fail");
        assert!(matches!(err, OutputError::JsonOpen { .. }));
    }
}
