//! Sampling schedule configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Controls how often a sample is taken and how many are taken.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between two samples. Must be at least 1 second.
    #[validate(range(min = 1, message = "Sampling interval must be at least 1 second"))]
    pub interval_seconds: u64,

    /// Number of samples to take before exiting; 0 samples until interrupted.
    pub num_samples: u64,

    /// Append a `cmonitor_stats` section to every sample.
    pub emit_stats: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            num_samples: 0,
            emit_stats: false,
        }
    }
}

impl SamplingConfig {
    pub fn is_unbounded(&self) -> bool {
        self.num_samples == 0
    }
}
