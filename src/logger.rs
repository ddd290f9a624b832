//! Centralized logging configuration and initialization manager.
//!
//! The `LoggerManager` validates the `[logger]` configuration and installs the
//! global `tracing` subscriber with a console layer (stderr) and/or a systemd
//! journald layer. `RUST_LOG` overrides the configured level.

use std::{fmt as std_fmt, io};

use thiserror::Error;
use time::{format_description::OwnedFormatItem, OffsetDateTime};
use tracing::instrument;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, format::Writer, time::FormatTime},
    prelude::*,
    EnvFilter, Layer,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig, TimestampFormat},
    print_info, print_warn,
};

/// Errors that can occur during logger configuration or initialization.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// General initialization failure with a descriptive message.
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// IO error, typically during journald socket operations.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald failed while console output was expected alongside it.
    #[error(
        "Failed to initialize journald logger, and console logger is enabled. Please check your configuration."
    )]
    JournaldFailedWithConsoleEnabled,
}

/// Console timestamp rendering selected by `timestamp_format`.
#[derive(Debug, Clone)]
pub enum LogTimer {
    Rfc3339,
    Unix,
    Custom(OwnedFormatItem),
}

impl LogTimer {
    pub fn from_config(format: &TimestampFormat) -> Result<Self, LoggerError> {
        Ok(match format {
            TimestampFormat::Rfc3339 => LogTimer::Rfc3339,
            TimestampFormat::Unix => LogTimer::Unix,
            TimestampFormat::Custom(description) => LogTimer::Custom(
                time::format_description::parse_owned::<2>(description).map_err(|e| {
                    LoggerError::InitializationError(format!(
                        "invalid timestamp format '{}': {}",
                        description, e
                    ))
                })?,
            ),
        })
    }

    fn render(&self, now: OffsetDateTime) -> String {
        match self {
            LogTimer::Rfc3339 => now
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            LogTimer::Unix => format!("{}.{:06}", now.unix_timestamp(), now.microsecond()),
            LogTimer::Custom(items) => now.format(items).unwrap_or_default(),
        }
    }
}

impl FormatTime for LogTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std_fmt::Result {
        write!(w, "{}", self.render(OffsetDateTime::now_utc()))
    }
}

/// Manages logging configuration and global subscriber initialization.
pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// Creates a new `LoggerManager` and validates the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        Ok(LoggerManager { config })
    }

    /// Initializes the global `tracing` subscriber with configured layers.
    ///
    /// Must be called once at startup, before any sample is taken.
    ///
    /// # Errors
    ///
    /// Returns an error if no layer can be created or if journald
    /// initialization fails while console output is also requested.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let mut layers = Vec::new();
        if let Some(console_config) = self.config.console.as_ref().filter(|c| c.enabled) {
            let console_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.config.level));
            let timer = LogTimer::from_config(&self.config.timestamp_format)?;

            layers.push(self.init_console_logger(console_config, timer, console_filter)?);
        }

        if let Some(journald_config) = self.config.journald.as_ref().filter(|j| j.enabled) {
            let journald_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.config.level));

            match self.init_journald_logger(&journald_config.identifier, journald_filter) {
                Ok(journald_layer) => {
                    layers.push(journald_layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald_config.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console.as_ref().is_some_and(|c| c.enabled) {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn init_console_logger(
        &self,
        config: &ConsoleConfig,
        timer: LogTimer,
        filter: EnvFilter,
    ) -> Result<Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>, LoggerError> {
        let writer = io::stderr;
        let span_events = if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_timer(timer)
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_timer(timer)
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(config.ansi_colors)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_timer(timer)
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_span_events(span_events)
                .with_ansi(config.ansi_colors)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
        };

        Ok(layer)
    }

    fn init_journald_logger(
        &self,
        identifier: &str,
        filter: EnvFilter,
    ) -> Result<Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>, LoggerError> {
        let journald_layer = tracing_journald::layer()?.with_syslog_identifier(identifier.to_owned());
        Ok(journald_layer.with_filter(filter).boxed())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::config::logger::JournaldConfig;

    #[test]
    fn test_timer_rendering() {
        let at = datetime!(2024-03-01 12:30:05.25 UTC);

        assert_eq!(LogTimer::Rfc3339.render(at), "2024-03-01T12:30:05.25Z");
        assert_eq!(LogTimer::Unix.render(at), "1709296205.250000");

        let custom =
            LogTimer::from_config(&TimestampFormat::Custom("[hour]:[minute]:[second]".into()))
                .unwrap();
        assert_eq!(custom.render(at), "12:30:05");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggerConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            LoggerManager::new(config),
            Err(LoggerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_no_layers() {
        let config = LoggerConfig {
            console: None,
            journald: Some(JournaldConfig::default()),
            ..Default::default()
        };
        let mut manager = LoggerManager::new(config).unwrap();
        assert!(matches!(
            manager.init(),
            Err(LoggerError::NoLayersConfigured)
        ));
    }
}
