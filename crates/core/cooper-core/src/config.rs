//! Session configuration

use serde::{Deserialize, Serialize};

/// Configuration fixed at session construction.
///
/// The session never exposes a setter: switching metrics recording
/// mid-session is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Append utilization samples to metric series on every tick
    pub record_metrics: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_metrics: true,
        }
    }
}

impl RecorderConfig {
    /// Lifecycle timestamps only, no metric series
    pub fn lifecycle_only() -> Self {
        Self {
            record_metrics: false,
        }
    }

    /// Set whether metrics are recorded
    pub fn with_metrics(mut self, record_metrics: bool) -> Self {
        self.record_metrics = record_metrics;
        self
    }
}
