//! Hierarchical reconciliation
//!
//! Brings the recorded host → VM → cloudlet tree up to date with one
//! observation, either a full [`TopologyView`] at a tick or a single
//! [`LifecycleEvent`]. Both paths go through the same per-entity primitives:
//!
//! ```text
//! reconcile(view, t)            apply(event)
//!     │                             │
//!     ├── observe_host ◄────────────┤ HostAdded / HostShutdown
//!     │     ├── observe_vm ◄────────┤ VmDeallocated
//!     │     │     └── observe_cloudlet ◄── CloudletFinished
//!     │     └── (end of VM)
//!     └── (end of host)
//! ```
//!
//! Every primitive is get-or-create followed by deduplicated appends, so a
//! repeated `(view, t)` pair, or an event followed by a poll reporting the
//! same transition, leaves the state unchanged after the first application.
//! Utilization is sampled on the poll path only, at most once per entity per
//! simulation time.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::RecorderConfig;
use crate::error::EntityIssue;
use crate::events::LifecycleEvent;
use crate::metrics::{CloudletSample, MetricSeries, Timestamped, UtilizationSample};
use crate::registry::EntityRegistry;
use crate::timeline::LifecycleTimeline;
use crate::types::{
    CloudletId, CloudletRecord, EntityKey, HostId, HostRecord, VmId, VmRecord,
};
use crate::topology::{CloudletView, HostView, TopologyView, VmView};

/// Root registry of a session
pub type HostRegistry = EntityRegistry<HostId, HostRecord>;

/// What one reconciliation changed or could not handle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Simulation time of the observation
    pub time: f64,
    /// Entities recorded for the first time
    pub discovered: Vec<EntityKey>,
    /// Entities whose start was recorded (hosts may appear more than once per session)
    pub started: Vec<EntityKey>,
    /// Entities whose end or finish was recorded
    pub ended: Vec<EntityKey>,
    /// Recorded hosts the view no longer resolves
    pub skipped_hosts: Vec<HostId>,
    /// Per-entity problems; the rest of the walk still ran
    pub issues: Vec<EntityIssue>,
}

impl TickReport {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            ..Default::default()
        }
    }

    /// True when no entity had to be skipped for an error
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// True when nothing was recorded and nothing went wrong
    pub fn is_noop(&self) -> bool {
        self.discovered.is_empty()
            && self.started.is_empty()
            && self.ended.is_empty()
            && self.issues.is_empty()
    }
}

/// Walks observations into a [`HostRegistry`].
///
/// Keeps a session-wide parent index so a VM or cloudlet id can only ever
/// live under the parent it was first recorded under.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: RecorderConfig,
    vm_owner: HashMap<VmId, HostId>,
    cloudlet_owner: HashMap<CloudletId, VmId>,
}

impl Reconciler {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            vm_owner: HashMap::new(),
            cloudlet_owner: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Reconcile a full topology view observed at `time`
    pub fn reconcile(&mut self, hosts: &mut HostRegistry, view: &TopologyView, time: f64) -> TickReport {
        let mut report = TickReport::new(time);

        for host_view in &view.hosts {
            self.observe_host(hosts, host_view, Some(time), &mut report);
        }

        // Hosts the engine dropped from its topology are skipped, not ended:
        // the engine did not report a shutdown.
        for host_id in hosts.ids() {
            if view.host(host_id).is_none() {
                debug!("Host {} not resolvable at t={}, skipping", host_id, time);
                report.skipped_hosts.push(host_id);
            }
        }

        for issue in &report.issues {
            warn!("t={}: {}", time, issue);
        }

        report
    }

    /// Apply a single lifecycle event
    pub fn apply(&mut self, hosts: &mut HostRegistry, event: &LifecycleEvent) -> TickReport {
        let time = event.time();
        let mut report = TickReport::new(time);

        match event {
            LifecycleEvent::HostAdded { host, .. } => {
                self.observe_host(hosts, host, None, &mut report);
            }
            LifecycleEvent::HostShutdown { host, .. } => {
                // The event itself is the shutdown, whatever `active` still says.
                if let Some(record) = self.observe_host(hosts, host, None, &mut report) {
                    let key = EntityKey::Host(host.id);
                    if end_on_event(&mut record.timeline, host.finish_time, time) {
                        report.ended.push(key);
                    }
                }
            }
            LifecycleEvent::VmDeallocated { host_id, vm, .. } => match hosts.get_mut(*host_id) {
                Some(host) => {
                    if let Some(record) = self.observe_vm(host, vm, None, &mut report) {
                        let key = EntityKey::Vm(vm.id);
                        if end_on_event(&mut record.timeline, vm.finish_time, time) {
                            report.ended.push(key);
                        }
                    }
                }
                None => report.issues.push(EntityIssue::UnknownHost(*host_id)),
            },
            LifecycleEvent::CloudletFinished { host_id, cloudlet, .. } => {
                let vm_id = cloudlet.vm_id;
                match hosts.get_mut(*host_id) {
                    Some(host) => match host.vms.get_mut(vm_id) {
                        Some(vm) => {
                            if let Some(record) = self.observe_cloudlet(vm, cloudlet, None, &mut report) {
                                if record.finish_at(time) {
                                    report.ended.push(EntityKey::Cloudlet(cloudlet.id));
                                }
                            }
                        }
                        None => report.issues.push(EntityIssue::UnknownVm {
                            host_id: *host_id,
                            vm_id,
                        }),
                    },
                    None => report.issues.push(EntityIssue::UnknownHost(*host_id)),
                }
            }
        }

        for issue in &report.issues {
            warn!("Event {:?} at t={}: {}", event.subject(), time, issue);
        }

        report
    }

    fn observe_host<'h>(
        &mut self,
        hosts: &'h mut HostRegistry,
        view: &HostView,
        sample_at: Option<f64>,
        report: &mut TickReport,
    ) -> Option<&'h mut HostRecord> {
        let key = EntityKey::Host(view.id);
        if !times_are_finite(key, view.start_time, view.finish_time, report) {
            return None;
        }

        if !hosts.contains(view.id) {
            report.discovered.push(key);
        }
        let host = hosts.get_or_create(view.id, |_| HostRecord::new(view));

        if view.start_time >= 0.0 {
            let before = host.timeline.start_times().len();
            host.timeline.record_start(view.start_time);
            if host.timeline.start_times().len() > before {
                report.started.push(key);
            }
        }

        if let Some(time) = self.sample_time(&host.metrics, sample_at) {
            host.metrics.record(UtilizationSample {
                simulation_time: time,
                cpu_utilization: view.cpu_utilization,
                ram_usage_mb: view.ram_usage_mb,
                ram_available_mb: None,
            });
        }

        for vm_view in &view.vms {
            self.observe_vm(host, vm_view, sample_at, report);
        }

        if !view.active && view.finish_time > 0.0 {
            let before = host.timeline.end_times().len();
            host.timeline.record_end(view.finish_time);
            if host.timeline.end_times().len() > before {
                report.ended.push(key);
            }
        }

        Some(host)
    }

    fn observe_vm<'h>(
        &mut self,
        host: &'h mut HostRecord,
        view: &VmView,
        sample_at: Option<f64>,
        report: &mut TickReport,
    ) -> Option<&'h mut VmRecord> {
        let key = EntityKey::Vm(view.id);
        if !times_are_finite(key, view.start_time, view.finish_time, report) {
            return None;
        }

        let recorded = *self.vm_owner.entry(view.id).or_insert(host.id);
        if recorded != host.id {
            report.issues.push(EntityIssue::VmReparented {
                vm_id: view.id,
                recorded,
                reported: host.id,
            });
            return None;
        }

        if !host.vms.contains(view.id) {
            report.discovered.push(key);
        }
        let host_id = host.id;
        let vm = host.vms.get_or_create(view.id, |_| VmRecord::new(host_id, view));

        if view.start_time >= 0.0 {
            let before = vm.timeline.start_times().len();
            vm.timeline.record_start(view.start_time);
            if vm.timeline.start_times().len() > before {
                report.started.push(key);
            }
        }

        if let Some(time) = self.sample_time(&vm.metrics, sample_at) {
            vm.metrics.record(UtilizationSample {
                simulation_time: time,
                cpu_utilization: view.cpu_utilization,
                ram_usage_mb: view.ram_usage_mb,
                ram_available_mb: Some(view.ram_available_mb),
            });
        }

        for cloudlet_view in &view.cloudlets {
            self.observe_cloudlet(vm, cloudlet_view, sample_at, report);
        }

        if view.finish_time > 0.0 {
            let before = vm.timeline.end_times().len();
            vm.timeline.record_end(view.finish_time);
            if vm.timeline.end_times().len() > before {
                report.ended.push(key);
            }
        }

        Some(vm)
    }

    fn observe_cloudlet<'v>(
        &mut self,
        vm: &'v mut VmRecord,
        view: &CloudletView,
        sample_at: Option<f64>,
        report: &mut TickReport,
    ) -> Option<&'v mut CloudletRecord> {
        let key = EntityKey::Cloudlet(view.id);
        if !times_are_finite(key, view.start_time, view.finish_time, report) {
            return None;
        }

        let recorded = *self.cloudlet_owner.entry(view.id).or_insert(vm.id);
        if recorded != vm.id {
            report.issues.push(EntityIssue::CloudletReparented {
                cloudlet_id: view.id,
                recorded,
                reported: vm.id,
            });
            return None;
        }

        if !vm.cloudlets.contains(view.id) {
            report.discovered.push(key);
        }
        let vm_id = vm.id;
        let cloudlet = vm.cloudlets.get_or_create(view.id, |_| CloudletRecord::new(vm_id, view));

        // Samples stop once the cloudlet is done; the finishing tick still gets one.
        let was_running = !cloudlet.is_finished();
        let change = cloudlet.observe(view);
        if change.started {
            report.started.push(key);
        }
        if change.finished {
            report.ended.push(key);
        }

        if was_running {
            if let Some(time) = self.sample_time(&cloudlet.metrics, sample_at) {
                cloudlet.metrics.record(CloudletSample {
                    simulation_time: time,
                    cpu_utilization: view.cpu_utilization,
                    ram_utilization: view.ram_utilization,
                });
            }
        }

        Some(cloudlet)
    }

    /// Time to sample `series` at, if metrics are on and it has no sample there yet
    fn sample_time<S: Timestamped>(&self, series: &MetricSeries<S>, sample_at: Option<f64>) -> Option<f64> {
        sample_at.filter(|time| self.config.record_metrics && !series.has_sample_at(*time))
    }
}

/// Record the end a shutdown or deallocation event stands for.
///
/// A positive reported finish wins. Otherwise the event time is used, but only
/// while the entity is running, so a stale event cannot add a second end.
fn end_on_event(timeline: &mut LifecycleTimeline, finish_time: f64, event_time: f64) -> bool {
    let end = if finish_time > 0.0 {
        finish_time
    } else if timeline.is_running() {
        event_time
    } else {
        return false;
    };
    let before = timeline.end_times().len();
    timeline.record_end(end);
    timeline.end_times().len() > before
}

fn times_are_finite(key: EntityKey, start: f64, finish: f64, report: &mut TickReport) -> bool {
    for (field, value) in [("start time", start), ("finish time", finish)] {
        if !value.is_finite() {
            report.issues.push(EntityIssue::NonFiniteTime {
                entity: key.to_string(),
                field,
            });
            return false;
        }
    }
    true
}
