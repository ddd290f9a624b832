use std::{io, time::Duration};

use thiserror::Error;

/// Errors raised while setting up or feeding an output sink.
#[derive(Error, Debug)]
pub enum OutputError {
    /// The JSON output file could not be created.
    #[error("Failed to open {path} as JSON output file")]
    JsonOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Writing to or flushing a sink failed.
    #[error("I/O error on {sink} output: {source}")]
    Io {
        sink: &'static str,
        #[source]
        source: io::Error,
    },

    /// The InfluxDB host name did not resolve to any address.
    #[error("Lookup of IP address for hostname {host} failed: {reason}")]
    Resolve { host: String, reason: String },

    /// The InfluxDB connection is down and the reconnect holdoff has not expired.
    #[error("InfluxDB endpoint {endpoint} unavailable, next connection attempt in {retry_in:?}")]
    TransportUnavailable { endpoint: String, retry_in: Duration },

    /// The same KPI name appears twice in the descriptor table.
    #[error("Duplicate Prometheus KPI: {0}")]
    DuplicateKpi(String),

    /// The Prometheus registry could not be rendered.
    #[error("Failed to encode Prometheus registry: {0}")]
    Encode(#[from] std::fmt::Error),

    /// The Prometheus scrape endpoint could not be bound or served.
    #[error("Prometheus endpoint {address} failed")]
    Exposer {
        address: String,
        #[source]
        source: io::Error,
    },
}

impl OutputError {
    pub(crate) fn io(sink: &'static str) -> impl FnOnce(io::Error) -> OutputError {
        move |source| OutputError::Io { sink, source }
    }
}
