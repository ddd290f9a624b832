//! Output frontend of the cmonitor host and container metrics collector.
//!
//! Collectors record each sample into a tree of sections through the
//! recording API of [`core::output::OutputFrontend`]; every tick the tree is
//! fanned out to the configured sinks:
//!
//! * JSON: one document holding a header object and an array of samples,
//!   written to a file or stdout.
//! * InfluxDB: line protocol over HTTP or UDP, tagged with host identity taken
//!   from the header.
//! * Prometheus: a fixed set of KPIs updated in place and served on
//!   `GET /metrics`.
//!
//! ## Modules
//!
//! * `config`: TOML configuration (`[logger]`, `[sampling]`, `[output.*]`)
//!   validated with the `validator` crate.
//!
//! * `core`: runtime components:
//!   - `output`: sample tree, recording API, sinks and transports
//!   - `header`: static host description emitted before the first sample
//!   - `executor`: the sampling loop
//!
//! * `logger`: `tracing` subscriber setup with console (stderr) and
//!   journald layers.

pub mod config;
pub mod core;
pub mod logger;
