//! Trace replay
//!
//! A trace is a recorded engine run: the polled topology views and the
//! lifecycle notifications in the order the engine produced them.
//!
//! ```json
//! {
//!   "name": "two-hosts",
//!   "steps": [
//!     { "tick":  { "time": 0.0, "topology": { "hosts": [ ... ] } } },
//!     { "event": { "kind": "hostShutdown", "time": 7.0, "host": { ... } } }
//!   ],
//!   "finish": { "time": 10.0, "topology": { "hosts": [ ... ] } }
//! }
//! ```
//!
//! Events go through a [`NotificationHub`] so only entities the session has
//! subscribed to receive them, as with a live engine.

use std::path::Path;

use cooper_core::{
    EntityIssue, EventAdapter, LifecycleEvent, NotificationHub, RecorderConfig, RecordingSession,
    SessionSnapshot, SharedSession, TopologyView,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// One polled observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickStep {
    pub time: f64,
    pub topology: TopologyView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TraceStep {
    Tick(TickStep),
    Event(LifecycleEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<TraceStep>,
    /// Final observation; the last tick is reused when absent
    #[serde(default)]
    pub finish: Option<TickStep>,
}

impl Trace {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| AppError::invalid_trace(path, e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Counters from one replay
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    pub ticks: usize,
    pub events: usize,
    /// Events no listener was subscribed to
    pub unrouted_events: usize,
    pub issues: Vec<EntityIssue>,
}

/// Replay `trace` into a fresh session and finish it
pub fn replay(
    trace: &Trace,
    name: &str,
    config: RecorderConfig,
) -> Result<(SessionSnapshot, ReplaySummary)> {
    let name = trace.name.as_deref().unwrap_or(name);
    let session = SharedSession::new(RecordingSession::new(name, config));
    let adapter = EventAdapter::new(session.clone());
    let mut hub = NotificationHub::new();
    adapter.watch_host_additions(&mut hub);

    let mut summary = ReplaySummary::default();
    let mut last_tick: Option<&TickStep> = None;

    for step in &trace.steps {
        match step {
            TraceStep::Tick(tick) => {
                let report = adapter.tick(&mut hub, &tick.topology, tick.time)?;
                summary.ticks += 1;
                summary.issues.extend(report.issues);
                last_tick = Some(tick);
            }
            TraceStep::Event(event) => {
                summary.events += 1;
                if hub.publish(event) == 0 {
                    debug!("No subscriber for {:?} at t={}", event.subject(), event.time());
                    summary.unrouted_events += 1;
                }
                adapter.sync(&mut hub);
            }
        }
    }

    let snapshot = match trace.finish.as_ref().or(last_tick) {
        Some(finish) => session.finish(&finish.topology, finish.time)?,
        None => {
            let time = session.with(|s| s.duration());
            session.finish(&TopologyView::default(), time)?
        }
    };

    info!(
        "Replayed '{}': {} ticks, {} events ({} unrouted), {} issues",
        name,
        summary.ticks,
        summary.events,
        summary.unrouted_events,
        summary.issues.len()
    );
    Ok((snapshot, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooper_core::{CloudletView, HostView, VmView};

    fn running(time: f64, finished_length: u64) -> TickStep {
        TickStep {
            time,
            topology: TopologyView::new(vec![HostView::new(1, 4, 0.0).with_vm(
                VmView::new(10, 2, 0.0).with_cloudlet(
                    CloudletView::new(100, 10, 1000).progress(0.0, finished_length, time),
                ),
            )]),
        }
    }

    #[test]
    fn test_trace_json_format() {
        let json = r#"{
            "name": "tiny",
            "steps": [
                {"tick": {"time": 0.0, "topology": {"hosts": [
                    {"id": 1, "numCpuCores": 4, "active": true, "startTime": 0.0}
                ]}}},
                {"event": {"kind": "hostShutdown", "time": 5.0,
                    "host": {"id": 1, "numCpuCores": 4, "active": false,
                             "startTime": 0.0, "finishTime": 5.0}}}
            ]
        }"#;
        let trace = Trace::from_json(json).unwrap();
        assert_eq!(trace.steps.len(), 2);
        assert!(trace.finish.is_none());

        let (snapshot, summary) = replay(&trace, "ignored", RecorderConfig::default()).unwrap();
        assert_eq!(snapshot.name, "tiny");
        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.unrouted_events, 0);
        assert_eq!(snapshot.hosts["1"].end_times_seconds, vec![5.0]);
        assert_eq!(snapshot.duration, 5.0);
        assert!(snapshot.is_finished());
    }

    #[test]
    fn test_replay_converges_event_and_poll() {
        let finished = CloudletView::new(100, 10, 1000).progress(0.0, 1000, 4.0);
        let trace = Trace {
            name: None,
            steps: vec![
                TraceStep::Tick(running(0.0, 0)),
                TraceStep::Tick(running(2.0, 500)),
                TraceStep::Event(LifecycleEvent::CloudletFinished {
                    time: 4.0,
                    host_id: 1,
                    cloudlet: finished.clone(),
                }),
                TraceStep::Event(LifecycleEvent::VmDeallocated {
                    time: 4.0,
                    host_id: 1,
                    vm: VmView::new(10, 2, 0.0).finished(4.0),
                }),
            ],
            finish: Some(TickStep {
                time: 6.0,
                topology: TopologyView::new(vec![HostView::new(1, 4, 0.0).with_vm(
                    VmView::new(10, 2, 0.0)
                        .finished(4.0)
                        .with_cloudlet(finished.finished(4.0)),
                )]),
            }),
        };

        let (snapshot, summary) = replay(&trace, "converge", RecorderConfig::default()).unwrap();

        assert_eq!(snapshot.name, "converge");
        assert_eq!(summary.events, 2);
        assert_eq!(summary.unrouted_events, 0);
        let vm = &snapshot.hosts["1"].vms["10"];
        assert_eq!(vm.end_times_seconds, vec![4.0]);
        let cloudlet = &vm.cloudlets["100"];
        assert_eq!(cloudlet.finish_time, Some(4.0));
        assert_eq!(cloudlet.finished_length, 1000);
        assert_eq!(snapshot.times_seconds, vec![0.0, 2.0, 6.0]);
    }

    #[test]
    fn test_event_for_unwatched_entity_is_unrouted() {
        let trace = Trace {
            name: None,
            steps: vec![
                TraceStep::Tick(running(0.0, 0)),
                TraceStep::Event(LifecycleEvent::VmDeallocated {
                    time: 1.0,
                    host_id: 1,
                    vm: VmView::new(99, 1, 0.0).finished(1.0),
                }),
            ],
            finish: None,
        };

        let (snapshot, summary) = replay(&trace, "unrouted", RecorderConfig::default()).unwrap();
        assert_eq!(summary.unrouted_events, 1);
        assert!(!snapshot.hosts["1"].vms.contains_key("99"));
    }

    #[test]
    fn test_load_reports_path_on_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"steps\": [").unwrap();

        match Trace::load(&path) {
            Err(AppError::InvalidTrace { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected InvalidTrace, got {:?}", other),
        }
    }
}
