//! Output sink configuration.
//!
//! JSON output is always configured (it may be disabled with `path = "none"`);
//! InfluxDB and Prometheus outputs are enabled by the presence of their table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Where the JSON document goes.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct JsonOutputConfig {
    /// File prefix (`.json` is appended when missing), `"stdout"` or `"none"`.
    #[validate(length(min = 1, message = "JSON output path must not be empty"))]
    pub path: String,

    /// Indent the document and put every field on its own line.
    pub pretty: bool,
}

impl Default for JsonOutputConfig {
    fn default() -> Self {
        Self {
            path: "stdout".to_string(),
            pretty: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InfluxProtocol {
    #[default]
    Http,
    Udp,
}

/// InfluxDB line protocol output.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
#[validate(schema(function = "validate_reconnect_bounds"))]
pub struct InfluxDbOutputConfig {
    #[validate(length(min = 1, message = "InfluxDB host must not be empty"))]
    pub host: String,

    #[validate(range(min = 1, message = "InfluxDB port must not be 0"))]
    pub port: u16,

    /// Target database, used by the HTTP protocol only.
    #[validate(length(min = 1, message = "InfluxDB database must not be empty"))]
    pub database: String,

    pub protocol: InfluxProtocol,

    /// First reconnection holdoff after a failed write.
    #[validate(range(
        min = 1,
        max = 86400,
        message = "Reconnect delay must be between 1 second and 1 day"
    ))]
    pub reconnect_initial_seconds: u64,

    /// Upper bound of the reconnection holdoff.
    #[validate(range(max = 86400, message = "Reconnect delay must not exceed 1 day"))]
    pub reconnect_max_seconds: u64,

    /// Connect and write timeout, in milliseconds.
    #[validate(range(min = 1, message = "InfluxDB timeout must be at least 1 ms"))]
    pub timeout_ms: u64,
}

fn validate_reconnect_bounds(config: &InfluxDbOutputConfig) -> Result<(), ValidationError> {
    if config.reconnect_max_seconds < config.reconnect_initial_seconds {
        let mut err = ValidationError::new("invalid_reconnect_bounds");
        err.message = Some(
            format!(
                "reconnect_max_seconds ({}) is lower than reconnect_initial_seconds ({})",
                config.reconnect_max_seconds, config.reconnect_initial_seconds
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

impl Default for InfluxDbOutputConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            database: "cmonitor".to_string(),
            protocol: InfluxProtocol::Http,
            reconnect_initial_seconds: 1,
            reconnect_max_seconds: 60,
            timeout_ms: 2000,
        }
    }
}

/// Prometheus scrape endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct PrometheusOutputConfig {
    /// `address:port` the `/metrics` endpoint binds to.
    #[validate(custom(function = "validate_listen_address"))]
    pub listen: String,

    /// Constant labels added to every KPI, next to `function="cmonitor"`.
    pub metadata: BTreeMap<String, String>,
}

fn validate_listen_address(listen: &str) -> Result<(), ValidationError> {
    match listen.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_listen_address");
            err.message = Some(format!("Invalid listen address: {}", listen).into());
            Err(err)
        }
    }
}

impl Default for PrometheusOutputConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9100".to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    #[validate(nested)]
    pub json: JsonOutputConfig,

    #[validate(nested)]
    pub influxdb: Option<InfluxDbOutputConfig>,

    #[validate(nested)]
    pub prometheus: Option<PrometheusOutputConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_json_only() {
        let config = OutputConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.json.path, "stdout");
        assert!(config.influxdb.is_none());
        assert!(config.prometheus.is_none());
    }

    #[test]
    fn test_full_table() {
        let config: OutputConfig = toml::from_str(
            r#"
            [json]
            path = "/var/log/cmonitor/node1"
            pretty = true

            [influxdb]
            host = "influx.local"
            port = 8089
            protocol = "udp"

            [prometheus]
            listen = "127.0.0.1:9200"
            metadata = { cluster = "prod", zone = "eu-1" }
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert!(config.json.pretty);

        let influx = config.influxdb.unwrap();
        assert_eq!(influx.protocol, InfluxProtocol::Udp);
        assert_eq!(influx.port, 8089);
        assert_eq!(influx.database, "cmonitor");

        let prom = config.prometheus.unwrap();
        assert_eq!(prom.metadata.get("cluster").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let parsed: Result<InfluxDbOutputConfig, _> = toml::from_str(r#"protocol = "tcp""#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_reconnect_bounds() {
        let config = InfluxDbOutputConfig {
            reconnect_initial_seconds: 30,
            reconnect_max_seconds: 10,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lower than"));
    }

    #[test]
    fn test_reconnect_delays_capped_at_one_day() {
        let config = InfluxDbOutputConfig {
            reconnect_initial_seconds: 86400,
            reconnect_max_seconds: 86400,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = InfluxDbOutputConfig {
            reconnect_max_seconds: u64::MAX,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.field_errors().contains_key("reconnect_max_seconds"));

        let config = InfluxDbOutputConfig {
            reconnect_initial_seconds: 1 << 60,
            reconnect_max_seconds: 1 << 60,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.field_errors().contains_key("reconnect_initial_seconds"));
    }

    #[test]
    fn test_listen_address() {
        assert!(validate_listen_address("0.0.0.0:9100").is_ok());
        assert!(validate_listen_address("[::]:9100").is_ok());
        assert!(validate_listen_address("localhost").is_err());
        assert!(validate_listen_address(":9100").is_err());
        assert!(validate_listen_address("host:99999").is_err());
    }

    #[test]
    fn test_empty_json_path_rejected() {
        let config = OutputConfig {
            json: JsonOutputConfig {
                path: String::new(),
                pretty: false,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
