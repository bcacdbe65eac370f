//! Utilization metric series
//!
//! Unlike lifecycle timelines, series never deduplicate by value: identical
//! utilization at consecutive ticks is legitimate data. Callers skip
//! [`MetricSeries::record`] entirely when metrics are disabled, which keeps
//! "never recorded" (empty) distinguishable from "recorded, all equal".

use serde::{Deserialize, Serialize};

/// A sample that carries the simulation time it was taken at
pub trait Timestamped {
    fn simulation_time(&self) -> f64;
}

/// Host or VM utilization at one point in simulated time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilizationSample {
    /// Simulation clock (seconds)
    pub simulation_time: f64,
    /// CPU utilization (0.0 - 1.0)
    pub cpu_utilization: f64,
    /// RAM in use (megabytes)
    #[serde(rename = "ramUsage")]
    pub ram_usage_mb: f64,
    /// RAM still available (megabytes), reported for VMs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_available_mb: Option<f64>,
}

/// Cloudlet utilization at one point in simulated time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudletSample {
    pub simulation_time: f64,
    /// Share of the VM's CPU used by the cloudlet (0.0 - 1.0)
    pub cpu_utilization: f64,
    /// Share of the VM's RAM used by the cloudlet (0.0 - 1.0)
    pub ram_utilization: f64,
}

impl Timestamped for UtilizationSample {
    fn simulation_time(&self) -> f64 {
        self.simulation_time
    }
}

impl Timestamped for CloudletSample {
    fn simulation_time(&self) -> f64 {
        self.simulation_time
    }
}

/// Append-only ordered sequence of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSeries<S> {
    samples: Vec<S>,
}

impl<S> Default for MetricSeries<S> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
        }
    }
}

impl<S> MetricSeries<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample unconditionally
    pub fn record(&mut self, sample: S) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[S] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl<S: Timestamped> MetricSeries<S> {
    /// Simulation time of the most recent sample
    pub fn last_time(&self) -> Option<f64> {
        self.samples.last().map(Timestamped::simulation_time)
    }

    /// True when any sample was taken at `time`
    pub fn has_sample_at(&self, time: f64) -> bool {
        self.samples.iter().rev().any(|s| s.simulation_time() == time)
    }
}
