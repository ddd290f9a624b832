//! Output frontend: builds one sample tree per tick and fans it out to every
//! configured sink.
//!
//! Collectors describe a sample through the recording calls
//! (`section_start`, `plong`, `subsection_end`, ...). [`OutputFrontend::push`]
//! then hands the finished tree to the JSON, InfluxDB and Prometheus sinks in
//! turn and clears it for the next tick, keeping its allocation.
//!
//! Recording calls that do not respect the section nesting are bugs in the
//! caller and panic.

pub mod backoff;
pub mod error;
pub mod exposer;
pub mod influxdb;
pub mod json;
pub mod measurement;
pub mod prometheus;
pub mod sink;
pub mod transport;
pub mod tree;

pub use error::OutputError;
pub use measurement::Measurement;
pub use sink::{MetricSink, Tick, TickKind};
pub use tree::{Labels, SampleTree};

use time::OffsetDateTime;
use tracing::{debug, error, warn};

use tree::{Section, SubSubsection, Subsection};

/// Innermost node currently open for recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Idle,
    Section,
    Subsection,
    SubSubsection,
}

/// Running totals of recording calls since the frontend was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordingStats {
    pub sections: u64,
    pub subsections: u64,
    pub subsubsections: u64,
    pub strings: u64,
    pub longs: u64,
    pub doubles: u64,
    pub hexes: u64,
}

pub struct OutputFrontend {
    tree: SampleTree,
    cursor: Cursor,
    stats: RecordingStats,
    sinks: Vec<Box<dyn MetricSink>>,
    closed: bool,
}

impl Default for OutputFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFrontend {
    /// A frontend with no sinks; samples are built and discarded.
    pub fn new() -> Self {
        Self {
            tree: SampleTree::new(),
            cursor: Cursor::Idle,
            stats: RecordingStats::default(),
            sinks: Vec::new(),
            closed: false,
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn MetricSink>) {
        debug!("Enabled {} output", sink.name());
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// The sample being built.
    pub fn tree(&self) -> &SampleTree {
        &self.tree
    }

    pub fn stats(&self) -> RecordingStats {
        self.stats
    }

    /// Number of measurements recorded in the current sample.
    pub fn measurement_count(&self) -> usize {
        self.tree.measurement_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ---------------------------------------------------------------------
    // Structure

    pub fn section_start(&mut self, name: &str) {
        assert!(
            self.cursor == Cursor::Idle,
            "section_start({:?}) called while a {:?} is open",
            name,
            self.cursor
        );
        self.tree.sections_mut().push(Section::new(name));
        self.stats.sections += 1;
        self.cursor = Cursor::Section;
    }

    pub fn section_end(&mut self) {
        assert!(
            self.cursor == Cursor::Section,
            "section_end() called while a {:?} is open",
            self.cursor
        );
        self.cursor = Cursor::Idle;
    }

    pub fn subsection_start(&mut self, name: &str, labels: Labels) {
        assert!(
            self.cursor == Cursor::Section,
            "subsection_start({:?}) called while a {:?} is open",
            name,
            self.cursor
        );
        let section = self.current_section();
        match section.content.children_mut() {
            Some(children) => children.push(Subsection::new(name, labels)),
            None => panic!(
                "subsection {:?} added to section {:?} which already holds measurements",
                name, section.name
            ),
        }
        self.stats.subsections += 1;
        self.cursor = Cursor::Subsection;
    }

    pub fn subsection_end(&mut self) {
        assert!(
            self.cursor == Cursor::Subsection,
            "subsection_end() called while a {:?} is open",
            self.cursor
        );
        self.cursor = Cursor::Section;
    }

    pub fn subsubsection_start(&mut self, name: &str, labels: Labels) {
        assert!(
            self.cursor == Cursor::Subsection,
            "subsubsection_start({:?}) called while a {:?} is open",
            name,
            self.cursor
        );
        let subsection = self.current_subsection();
        match subsection.content.children_mut() {
            Some(children) => children.push(SubSubsection::new(name, labels)),
            None => panic!(
                "sub-subsection {:?} added to subsection {:?} which already holds measurements",
                name, subsection.name
            ),
        }
        self.stats.subsubsections += 1;
        self.cursor = Cursor::SubSubsection;
    }

    pub fn subsubsection_end(&mut self) {
        assert!(
            self.cursor == Cursor::SubSubsection,
            "subsubsection_end() called while a {:?} is open",
            self.cursor
        );
        self.cursor = Cursor::Subsection;
    }

    // ---------------------------------------------------------------------
    // Fields

    pub fn pstring(&mut self, name: &str, value: &str) {
        self.record(Measurement::string(name, value));
        self.stats.strings += 1;
    }

    pub fn plong(&mut self, name: &str, value: i64) {
        self.record(Measurement::long(name, value));
        self.stats.longs += 1;
    }

    pub fn pdouble(&mut self, name: &str, value: f64) {
        self.record(Measurement::double(name, value));
        self.stats.doubles += 1;
    }

    pub fn phex(&mut self, name: &str, value: u64) {
        self.record(Measurement::hex(name, value));
        self.stats.hexes += 1;
    }

    /// Records a `cmonitor_stats` section with the running totals.
    ///
    /// Each total is read right before it is recorded, so the integer count
    /// includes the totals this call has already written.
    pub fn pstats(&mut self) {
        let totals: [(&str, fn(&RecordingStats) -> u64); 7] = [
            ("section", |s| s.sections),
            ("subsections", |s| s.subsections),
            ("subsubsections", |s| s.subsubsections),
            ("string", |s| s.strings),
            ("long", |s| s.longs),
            ("double", |s| s.doubles),
            ("hex", |s| s.hexes),
        ];

        self.section_start("cmonitor_stats");
        for (name, total) in totals {
            let value = total(&self.stats);
            self.plong(name, i64::try_from(value).unwrap_or(i64::MAX));
        }
        self.section_end();
    }

    fn current_section(&mut self) -> &mut Section {
        match self.tree.sections_mut().last_mut() {
            Some(section) => section,
            None => unreachable!("a node is open but the sample has no section"),
        }
    }

    fn current_subsection(&mut self) -> &mut Subsection {
        let section = self.current_section();
        match section.content.children_mut().and_then(|c| c.last_mut()) {
            Some(subsection) => subsection,
            None => unreachable!("a subsection is open but section has none"),
        }
    }

    fn current_subsubsection(&mut self) -> &mut SubSubsection {
        let subsection = self.current_subsection();
        match subsection.content.children_mut().and_then(|c| c.last_mut()) {
            Some(subsubsection) => subsubsection,
            None => unreachable!("a sub-subsection is open but subsection has none"),
        }
    }

    fn record(&mut self, m: Measurement) {
        match self.cursor {
            Cursor::Idle => panic!(
                "measurement {:?} recorded outside of any section",
                m.name()
            ),
            Cursor::Section => {
                let section = self.current_section();
                match section.content.measurements_mut() {
                    Some(ms) => ms.push(m),
                    None => panic!(
                        "measurement {:?} recorded in section {:?} which holds subsections",
                        m.name(),
                        section.name
                    ),
                }
            }
            Cursor::Subsection => {
                let subsection = self.current_subsection();
                match subsection.content.measurements_mut() {
                    Some(ms) => ms.push(m),
                    None => panic!(
                        "measurement {:?} recorded in subsection {:?} which holds sub-subsections",
                        m.name(),
                        subsection.name
                    ),
                }
            }
            Cursor::SubSubsection => self.current_subsubsection().measurements.push(m),
        }
    }

    // ---------------------------------------------------------------------
    // Fan-out

    /// Pushes the current sample stamped with the current time.
    pub fn push(&mut self, kind: TickKind) -> Result<(), OutputError> {
        let timestamp_ns = u64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos()).unwrap_or(0);
        self.push_tick(Tick { kind, timestamp_ns })
    }

    /// Serializes the current sample to every sink, flushes them and clears
    /// the sample.
    ///
    /// A failing sink does not prevent the others from receiving the sample;
    /// the first error is returned once every sink has been fed.
    pub fn push_tick(&mut self, tick: Tick) -> Result<(), OutputError> {
        assert!(
            self.cursor == Cursor::Idle,
            "push() called while a {:?} is open",
            self.cursor
        );

        let mut first_error = None;
        let count = self.tree.measurement_count();

        for sink in self.sinks.iter_mut() {
            let result = sink.push(&self.tree, &tick).and_then(|_| sink.flush());
            match result {
                Ok(()) => debug!(
                    "Pushed {} measurements to {} output ({:?})",
                    count,
                    sink.name(),
                    tick.kind
                ),
                Err(e) => {
                    match &e {
                        OutputError::TransportUnavailable { .. } => {
                            warn!("Dropping sample for {} output: {}", sink.name(), e)
                        }
                        _ => error!("Failed to push sample to {} output: {}", sink.name(), e),
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        self.tree.clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Closes every sink. Calling it again does nothing.
    pub fn close(&mut self) -> Result<(), OutputError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        for mut sink in self.sinks.drain(..) {
            if let Err(e) = sink.close() {
                error!("Failed to close {} output: {}", sink.name(), e);
                first_error.get_or_insert(e);
            } else {
                debug!("Closed {} output", sink.name());
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for OutputFrontend {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Error while closing outputs: {}", e);
        }
    }
}
