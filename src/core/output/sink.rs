//! Capability interface shared by every output backend.

use super::{error::OutputError, tree::SampleTree};

/// Whether a push carries the one-time header or a regular sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Header,
    Sample,
}

/// Metadata of one push.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub kind: TickKind,
    /// Wall clock time of the push in nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}

impl Tick {
    pub fn is_header(&self) -> bool {
        self.kind == TickKind::Header
    }
}

/// A destination for completed sample trees.
///
/// Sinks are fed synchronously from the sampling loop. A failing sink reports
/// its error and the frontend keeps feeding the others.
pub trait MetricSink: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Serializes one tree.
    fn push(&mut self, tree: &SampleTree, tick: &Tick) -> Result<(), OutputError>;

    /// Forces buffered output out.
    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    /// Releases the sink. Must be safe to call more than once.
    fn close(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}
