//! Lifecycle timelines
//!
//! A timeline holds the start and end timestamps of an entity. Both
//! sequences are append-only and deduplicated against the **last** entry
//! only, so a value that reappears after a different one is recorded again:
//!
//! ```text
//! record_end(10)  -> [10]
//! record_end(10)  -> [10]          (same as last, dropped)
//! record_end(20)  -> [10, 20]
//! record_end(10)  -> [10, 20, 10]  (differs from last, appended)
//! ```

use serde::{Deserialize, Serialize};

/// Start/end timestamps of one entity, in simulation seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleTimeline {
    starts: Vec<f64>,
    ends: Vec<f64>,
}

impl LifecycleTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a start time unless it equals the last recorded start
    pub fn record_start(&mut self, time: f64) {
        push_if_changed(&mut self.starts, time);
    }

    /// Append an end time unless it equals the last recorded end
    pub fn record_end(&mut self, time: f64) {
        push_if_changed(&mut self.ends, time);
    }

    pub fn start_times(&self) -> &[f64] {
        &self.starts
    }

    pub fn end_times(&self) -> &[f64] {
        &self.ends
    }

    pub fn last_start(&self) -> Option<f64> {
        self.starts.last().copied()
    }

    pub fn last_end(&self) -> Option<f64> {
        self.ends.last().copied()
    }

    /// True while there are more activations than shutdowns
    pub fn is_running(&self) -> bool {
        self.starts.len() > self.ends.len()
    }
}

fn push_if_changed(seq: &mut Vec<f64>, time: f64) {
    if seq.last() != Some(&time) {
        seq.push(time);
    }
}
