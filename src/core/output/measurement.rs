//! Single named values recorded into a sample tree.
//!
//! A measurement is either numeric, in which case its display text is already
//! final (only `[0-9.-]`, never quoted), or textual. Text comes from the kernel
//! or from files and cannot be trusted, so it is encoded as a JSON string the
//! first time the JSON sink asks for it and the encoded form is cached on the
//! measurement.

use once_cell::unsync::OnceCell;

/// Value carried by a [`Measurement`].
#[derive(Debug, Clone)]
pub enum MeasurementValue {
    /// Formatted number. `text` holds only `[0-9.-]` characters.
    Numeric { text: String, value: f64 },

    /// Arbitrary text. `numeric` is set when the text stands for a number that
    /// has no plain decimal rendering (hex values, non-finite doubles).
    Text {
        raw: String,
        numeric: Option<f64>,
        json: OnceCell<String>,
    },
}

/// A single named value inside a sample tree node.
#[derive(Debug, Clone)]
pub struct Measurement {
    name: String,
    value: MeasurementValue,
}

impl Measurement {
    /// Integer measurement, rendered in plain decimal.
    pub fn long(name: &str, value: i64) -> Self {
        Self {
            name: name.to_owned(),
            value: MeasurementValue::Numeric {
                text: value.to_string(),
                value: value as f64,
            },
        }
    }

    /// Floating point measurement, rendered with six fractional digits.
    ///
    /// NaN and infinities have no rendering inside `[0-9.-]`, so they are kept
    /// as text while their numeric value stays available to Prometheus.
    pub fn double(name: &str, value: f64) -> Self {
        let value = if value.is_finite() {
            MeasurementValue::Numeric {
                text: format!("{:.6}", value),
                value,
            }
        } else {
            let raw = if value.is_nan() {
                "NaN"
            } else if value.is_sign_positive() {
                "inf"
            } else {
                "-inf"
            };
            MeasurementValue::Text {
                raw: raw.to_owned(),
                numeric: Some(value),
                json: OnceCell::new(),
            }
        };

        Self {
            name: name.to_owned(),
            value,
        }
    }

    /// Free-form text measurement.
    pub fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: MeasurementValue::Text {
                raw: value.to_owned(),
                numeric: None,
                json: OnceCell::new(),
            },
        }
    }

    /// Unsigned value rendered as `0x...` text.
    pub fn hex(name: &str, value: u64) -> Self {
        Self {
            name: name.to_owned(),
            value: MeasurementValue::Text {
                raw: format!("0x{:x}", value),
                numeric: Some(value as f64),
                json: OnceCell::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &MeasurementValue {
        &self.value
    }

    /// True when the value can be emitted bare (unquoted) in every format.
    pub fn is_numeric(&self) -> bool {
        matches!(self.value, MeasurementValue::Numeric { .. })
    }

    /// The value as recorded, without any escaping.
    pub fn raw_value(&self) -> &str {
        match &self.value {
            MeasurementValue::Numeric { text, .. } => text,
            MeasurementValue::Text { raw, .. } => raw,
        }
    }

    /// Full precision numeric value, if the measurement has one.
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            MeasurementValue::Numeric { value, .. } => Some(*value),
            MeasurementValue::Text { numeric, .. } => *numeric,
        }
    }

    /// The value ready to be placed in a JSON document. Text values come
    /// back as a complete, quoted JSON string literal.
    ///
    /// Text is encoded at most once per measurement.
    pub fn json_value(&self) -> &str {
        match &self.value {
            MeasurementValue::Numeric { text, .. } => text,
            MeasurementValue::Text { raw, json, .. } => json.get_or_init(|| {
                serde_json::to_string(raw).unwrap_or_else(|_| String::from("\"\""))
            }),
        }
    }
}
