//! Recording session
//!
//! The aggregate a driver talks to. Owns the host registry and the
//! reconciler, and accepts observations until it is finished:
//!
//! ```text
//! new ──► tick / apply_event (any number, any interleaving) ──► finish ──► (read only)
//! ```
//!
//! [`SharedSession`] wraps a session in a mutex so the polling driver and
//! event listeners running elsewhere serialize through one writer.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::events::LifecycleEvent;
use crate::reconciler::{HostRegistry, Reconciler, TickReport};
use crate::snapshot::{HostSnapshot, SNAPSHOT_SCHEMA_VERSION, SessionSnapshot};
use crate::topology::TopologyView;

/// Recorded history of one simulation run
#[derive(Debug)]
pub struct RecordingSession {
    id: String,
    name: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    /// Latest simulation clock observed
    duration: f64,
    times: Vec<f64>,
    hosts: HostRegistry,
    reconciler: Reconciler,
}

impl RecordingSession {
    pub fn new(name: impl Into<String>, config: RecorderConfig) -> Self {
        let session = Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            started_at: Utc::now(),
            finished_at: None,
            duration: 0.0,
            times: Vec::new(),
            hosts: HostRegistry::new(),
            reconciler: Reconciler::new(config),
        };
        info!(
            "Recording session '{}' ({}) created, metrics {}",
            session.name,
            session.id,
            if config.record_metrics { "on" } else { "off" }
        );
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn config(&self) -> &RecorderConfig {
        self.reconciler.config()
    }

    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    /// Largest clock seen by any tick or event, not the clock of the last call
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Distinct tick times in call order
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Reconcile one polled topology view taken at `time`.
    ///
    /// Per-entity problems end up in the report; this only fails when the
    /// session is finished or `time` is not a finite number.
    pub fn tick(&mut self, view: &TopologyView, time: f64) -> Result<TickReport> {
        self.ensure_open()?;
        if !time.is_finite() {
            return Err(RecorderError::InvalidTime(time));
        }

        let report = self.reconciler.reconcile(&mut self.hosts, view, time);
        self.observe_clock(time);
        if self.times.last() != Some(&time) {
            self.times.push(time);
        }

        debug!(
            "Tick t={}: {} discovered, {} started, {} ended, {} skipped hosts",
            time,
            report.discovered.len(),
            report.started.len(),
            report.ended.len(),
            report.skipped_hosts.len()
        );
        Ok(report)
    }

    /// Apply one engine notification
    pub fn apply_event(&mut self, event: &LifecycleEvent) -> Result<TickReport> {
        self.ensure_open()?;
        let time = event.time();
        if !time.is_finite() {
            return Err(RecorderError::InvalidTime(time));
        }

        let report = self.reconciler.apply(&mut self.hosts, event);
        self.observe_clock(time);
        debug!("Applied {:?} event at t={}", event.subject(), time);
        Ok(report)
    }

    /// Run a last tick, close the session and return the final snapshot
    pub fn finish(&mut self, view: &TopologyView, time: f64) -> Result<SessionSnapshot> {
        self.tick(view, time)?;
        self.finished_at = Some(Utc::now());

        let snapshot = self.snapshot();
        info!(
            "Session '{}' finished at t={}: {} hosts, {} VMs, {} cloudlets",
            self.name,
            self.duration,
            snapshot.hosts.len(),
            snapshot.vm_count(),
            snapshot.cloudlet_count()
        );
        Ok(snapshot)
    }

    /// Owned copy of the current state
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            id: self.id.clone(),
            name: self.name.clone(),
            started_at: rfc3339(self.started_at),
            finished_at: self.finished_at.map(rfc3339),
            duration: self.duration,
            times_seconds: self.times.clone(),
            hosts: self
                .hosts
                .iter()
                .map(|(id, host)| (id.to_string(), HostSnapshot::from(host)))
                .collect(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_finished() {
            return Err(RecorderError::SessionFinished(self.id.clone()));
        }
        Ok(())
    }

    fn observe_clock(&mut self, time: f64) {
        if time > self.duration {
            self.duration = time;
        }
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Single-writer handle to a session shared between the poller and listeners
#[derive(Debug, Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<RecordingSession>>,
}

impl SharedSession {
    pub fn new(session: RecordingSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn tick(&self, view: &TopologyView, time: f64) -> Result<TickReport> {
        self.inner.lock().tick(view, time)
    }

    pub fn apply_event(&self, event: &LifecycleEvent) -> Result<TickReport> {
        self.inner.lock().apply_event(event)
    }

    pub fn finish(&self, view: &TopologyView, time: f64) -> Result<SessionSnapshot> {
        self.inner.lock().finish(view, time)
    }

    /// Copied under the lock
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot()
    }

    /// Run `f` with the session locked
    pub fn with<R>(&self, f: impl FnOnce(&RecordingSession) -> R) -> R {
        f(&self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{CloudletView, HostView, VmView};

    fn scenario_view(cloudlet: CloudletView) -> TopologyView {
        TopologyView::new(vec![
            HostView::new(1, 4, 0.0).with_vm(VmView::new(10, 2, 0.0).with_cloudlet(cloudlet)),
        ])
    }

    fn session() -> RecordingSession {
        RecordingSession::new("test", RecorderConfig::default())
    }

    #[test]
    fn test_cloudlet_lifecycle_across_ticks() {
        let mut session = session();
        session
            .tick(&scenario_view(CloudletView::new(100, 10, 1000)), 0.0)
            .unwrap();

        let snapshot = session.snapshot();
        let host = &snapshot.hosts["1"];
        assert_eq!(host.start_times_seconds, vec![0.0]);
        assert_eq!(host.vms["10"].start_times_seconds, vec![0.0]);
        let cloudlet = &host.vms["10"].cloudlets["100"];
        assert_eq!(cloudlet.start_time, None);
        assert_eq!(cloudlet.finished_length, 0);

        let done = CloudletView::new(100, 10, 1000).progress(0.0, 1000, 5.0).finished(5.0);
        session.tick(&scenario_view(done), 5.0).unwrap();

        // Later reports cannot move a finished cloudlet
        let late = CloudletView::new(100, 10, 1000).progress(0.0, 1200, 7.0).finished(7.0);
        session.tick(&scenario_view(late), 7.0).unwrap();

        let snapshot = session.snapshot();
        let cloudlet = &snapshot.hosts["1"].vms["10"].cloudlets["100"];
        assert_eq!(cloudlet.start_time, Some(0.0));
        assert_eq!(cloudlet.finish_time, Some(5.0));
        assert_eq!(cloudlet.finished_length, 1000);
        assert_eq!(cloudlet.execution_time, 5.0);
    }

    #[test]
    fn test_identical_ticks_record_one_start() {
        let mut session = session();
        let view = TopologyView::new(vec![HostView::new(1, 4, 0.0)]);
        session.tick(&view, 0.0).unwrap();
        let before = session.snapshot();
        session.tick(&view, 0.0).unwrap();

        let after = session.snapshot();
        assert_eq!(after.hosts["1"].start_times_seconds, vec![0.0]);
        assert_eq!(after, before);
        assert_eq!(after.times_seconds, vec![0.0]);
    }

    #[test]
    fn test_host_shutdown_appends_end_once() {
        let mut session = session();
        session
            .tick(&TopologyView::new(vec![HostView::new(1, 4, 0.0)]), 0.0)
            .unwrap();

        let down = TopologyView::new(vec![HostView::new(1, 4, 0.0).shut_down(10.0)]);
        for _ in 0..3 {
            session.tick(&down, 10.0).unwrap();
        }

        let snapshot = session.snapshot();
        let host = &snapshot.hosts["1"];
        assert_eq!(host.start_times_seconds, vec![0.0]);
        assert_eq!(host.end_times_seconds, vec![10.0]);
    }

    #[test]
    fn test_metrics_disabled_for_whole_session() {
        let mut session = RecordingSession::new("quiet", RecorderConfig::lifecycle_only());
        for step in 0..100u64 {
            let t = step as f64;
            let load = (step % 10) as f64 / 10.0;
            let cloudlet = CloudletView::new(100, 10, 10_000).progress(0.0, step * 10, t);
            let view = TopologyView::new(vec![
                HostView::new(1, 4, 0.0)
                    .with_utilization(load, 1024.0 * load)
                    .with_vm(
                        VmView::new(10, 2, 0.0)
                            .with_utilization(load, 512.0, 512.0)
                            .with_cloudlet(cloudlet),
                    ),
            ]);
            session.tick(&view, t).unwrap();
        }

        assert!(!session.config().record_metrics);
        let snapshot = session.snapshot();
        let host = &snapshot.hosts["1"];
        assert!(host.metrics.is_empty());
        assert!(host.vms["10"].metrics.is_empty());
        assert!(host.vms["10"].cloudlets["100"].metrics.is_empty());
        assert_eq!(snapshot.times_seconds.len(), 100);
    }

    #[test]
    fn test_metrics_sampled_once_per_tick() {
        let mut session = session();
        let view = scenario_view(CloudletView::new(100, 10, 1000).progress(0.0, 100, 0.5));
        session.tick(&view, 0.0).unwrap();
        session.tick(&view, 1.0).unwrap();
        session.tick(&view, 1.0).unwrap();

        let snapshot = session.snapshot();
        let host = &snapshot.hosts["1"];
        assert_eq!(host.metrics.len(), 2);
        assert_eq!(host.vms["10"].metrics.len(), 2);
        assert_eq!(host.vms["10"].metrics[1].ram_available_mb, Some(0.0));
    }

    #[test]
    fn test_every_reported_entity_is_recorded() {
        let mut session = session();
        let view = TopologyView::new(vec![
            HostView::new(1, 4, 0.0)
                .with_vm(
                    VmView::new(10, 2, 0.0)
                        .with_cloudlet(CloudletView::new(100, 10, 1000))
                        .with_cloudlet(CloudletView::new(101, 10, 2000)),
                )
                .with_vm(VmView::new(11, 2, -1.0)),
            HostView::new(2, 8, -1.0).with_vm(
                VmView::new(20, 4, 0.0).with_cloudlet(CloudletView::new(200, 20, 500)),
            ),
        ]);
        session.tick(&view, 0.0).unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.hosts.len(), 2);
        assert_eq!(snapshot.vm_count(), 3);
        assert_eq!(snapshot.cloudlet_count(), view.cloudlet_count());
        // Reported but not started
        assert!(snapshot.hosts["2"].start_times_seconds.is_empty());
        assert!(snapshot.hosts["1"].vms["11"].start_times_seconds.is_empty());
    }

    #[test]
    fn test_history_only_grows() {
        let mut session = session();
        let full = scenario_view(CloudletView::new(100, 10, 1000).progress(0.0, 100, 0.5));
        session.tick(&full, 0.0).unwrap();

        // The engine stops reporting the VM; nothing already recorded disappears
        let bare = TopologyView::new(vec![HostView::new(1, 4, 0.0)]);
        session.tick(&bare, 1.0).unwrap();

        let snapshot = session.snapshot();
        let vm = &snapshot.hosts["1"].vms["10"];
        assert_eq!(vm.start_times_seconds, vec![0.0]);
        assert_eq!(vm.cloudlets["100"].finished_length, 100);
    }

    #[test]
    fn test_duration_tracks_latest_clock() {
        let mut session = session();
        let view = TopologyView::new(vec![HostView::new(1, 4, 0.0)]);
        session.tick(&view, 4.0).unwrap();
        session.tick(&view, 2.0).unwrap();
        assert_eq!(session.duration(), 4.0);
        assert_eq!(session.times(), &[4.0, 2.0]);

        let event = LifecycleEvent::HostShutdown {
            time: 9.0,
            host: HostView::new(1, 4, 0.0).shut_down(9.0),
        };
        session.apply_event(&event).unwrap();
        assert_eq!(session.duration(), 9.0);
    }

    #[test]
    fn test_non_finite_clock_is_rejected() {
        let mut session = session();
        let result = session.tick(&TopologyView::default(), f64::NAN);
        assert!(matches!(result, Err(RecorderError::InvalidTime(_))));
        assert!(session.times().is_empty());
    }

    #[test]
    fn test_finished_session_rejects_updates() {
        let mut session = session();
        let view = TopologyView::new(vec![HostView::new(1, 4, 0.0)]);
        let snapshot = session.finish(&view, 3.0).unwrap();
        assert!(snapshot.is_finished());
        assert_eq!(snapshot.duration, 3.0);

        assert!(matches!(
            session.tick(&view, 4.0),
            Err(RecorderError::SessionFinished(_))
        ));
        assert!(matches!(
            session.finish(&view, 4.0),
            Err(RecorderError::SessionFinished(_))
        ));
        assert_eq!(session.snapshot().duration, 3.0);
    }

    #[test]
    fn test_snapshot_header() {
        let session = session();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(snapshot.name, "test");
        assert!(Uuid::parse_str(&snapshot.id).is_ok());
        assert!(DateTime::parse_from_rfc3339(&snapshot.started_at).is_ok());
        assert!(snapshot.hosts.is_empty());
    }

    #[test]
    fn test_shared_session_from_another_thread() {
        let shared = SharedSession::new(session());
        let worker = shared.clone();
        let handle = std::thread::spawn(move || {
            worker
                .tick(&TopologyView::new(vec![HostView::new(1, 4, 0.0)]), 1.0)
                .unwrap();
        });
        handle.join().unwrap();

        assert!(shared.with(|s| s.hosts().contains(1)));
        assert_eq!(shared.snapshot().duration, 1.0);
    }
}
