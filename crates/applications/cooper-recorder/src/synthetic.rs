//! Synthetic engine
//!
//! A small deterministic stand-in for a datacenter simulator, used by the
//! `simulate` command and by tests that need a realistic stream of views and
//! notifications.
//!
//! ```text
//! host ──► vm (cores × mips) ──► cloudlets share the VM capacity equally
//!
//! step():
//!   start cloudlets whose submission time has passed
//!   advance running cloudlets       ─► CloudletFinished
//!   VM with every cloudlet done     ─► VmDeallocated (VM leaves the host's list)
//!   host with every VM deallocated  ─► HostShutdown
//! ```
//!
//! All randomness comes from one seeded `StdRng`, so a seed reproduces the
//! same run.

use cooper_core::{
    CloudletView, EventAdapter, HostId, HostView, LifecycleEvent, NotificationHub, RecorderConfig,
    RecordingSession, SessionSnapshot, SharedSession, TopologyView, VmId, VmView,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, Result};

const MIPS_PER_CORE: f64 = 1000.0;
const VM_RAM_MB: f64 = 2048.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub hosts: usize,
    pub vms_per_host: usize,
    pub cloudlets_per_vm: usize,
    /// Upper bound on engine steps
    pub steps: usize,
    /// Simulated seconds per step
    pub step_seconds: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            hosts: 2,
            vms_per_host: 2,
            cloudlets_per_vm: 3,
            steps: 100,
            step_seconds: 1.0,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hosts == 0 {
            return Err(AppError::invalid_synthetic("at least one host is required"));
        }
        if !self.step_seconds.is_finite() || self.step_seconds <= 0.0 {
            return Err(AppError::invalid_synthetic(format!(
                "step_seconds must be positive, got {}",
                self.step_seconds
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SimCloudlet {
    id: u64,
    vm_id: VmId,
    length: u64,
    submit_at: f64,
    ram_share: f64,
    done_mi: f64,
    start: Option<f64>,
    finish: Option<f64>,
}

impl SimCloudlet {
    fn is_running(&self) -> bool {
        self.start.is_some() && self.finish.is_none()
    }

    fn view(&self, clock: f64, running: usize) -> CloudletView {
        let mut view = CloudletView::new(self.id, self.vm_id, self.length);
        if let Some(start) = self.start {
            let until = self.finish.unwrap_or(clock);
            view = view.progress(start, self.done_mi as u64, until - start);
        }
        if let Some(finish) = self.finish {
            view = view.finished(finish);
        }
        if self.is_running() {
            view.cpu_utilization = 1.0 / running.max(1) as f64;
            view.ram_utilization = self.ram_share;
        }
        view
    }
}

#[derive(Debug, Clone)]
struct SimVm {
    id: VmId,
    cores: u32,
    start: f64,
    finish: Option<f64>,
    cloudlets: Vec<SimCloudlet>,
}

impl SimVm {
    fn running(&self) -> usize {
        self.cloudlets.iter().filter(|c| c.is_running()).count()
    }

    fn view(&self, clock: f64) -> VmView {
        let running = self.running();
        let cpu = (running as f64 / self.cores as f64).min(1.0);
        let used = (VM_RAM_MB * (0.1 + 0.2 * running as f64)).min(VM_RAM_MB);

        let mut view = VmView::new(self.id, self.cores, self.start).with_utilization(
            cpu,
            used,
            VM_RAM_MB - used,
        );
        if let Some(finish) = self.finish {
            view = view.finished(finish);
        }
        for cloudlet in &self.cloudlets {
            view = view.with_cloudlet(cloudlet.view(clock, running));
        }
        view
    }
}

#[derive(Debug, Clone)]
struct SimHost {
    id: HostId,
    cores: u32,
    finish: Option<f64>,
    vms: Vec<SimVm>,
}

impl SimHost {
    fn view(&self, clock: f64) -> HostView {
        let mut view = HostView::new(self.id, self.cores, 0.0);
        let mut busy_cores = 0.0;
        let mut ram = 0.0;
        // Deallocated VMs are no longer listed by the host
        for vm in self.vms.iter().filter(|vm| vm.finish.is_none()) {
            let vm_view = vm.view(clock);
            busy_cores += vm_view.cpu_utilization * vm.cores as f64;
            ram += vm_view.ram_usage_mb;
            view = view.with_vm(vm_view);
        }
        view = view.with_utilization((busy_cores / self.cores as f64).min(1.0), ram);

        match self.finish {
            Some(finish) => view.shut_down(finish),
            None => view,
        }
    }
}

/// Deterministic toy datacenter
pub struct SyntheticEngine {
    config: SyntheticConfig,
    clock: f64,
    steps_taken: usize,
    hosts: Vec<SimHost>,
}

impl SyntheticEngine {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut next_vm: VmId = 1;
        let mut next_cloudlet: u64 = 1;
        let mut hosts = Vec::with_capacity(config.hosts);

        for host_index in 0..config.hosts {
            let mut vms = Vec::with_capacity(config.vms_per_host);
            for _ in 0..config.vms_per_host {
                let vm_id = next_vm;
                next_vm += 1;

                let cloudlets = (0..config.cloudlets_per_vm)
                    .map(|_| {
                        let id = next_cloudlet;
                        next_cloudlet += 1;
                        SimCloudlet {
                            id,
                            vm_id,
                            length: rng.gen_range(1_000..=20_000),
                            submit_at: rng.gen_range(0..5) as f64 * config.step_seconds,
                            ram_share: rng.gen_range(0.05..0.3),
                            done_mi: 0.0,
                            start: None,
                            finish: None,
                        }
                    })
                    .collect();

                vms.push(SimVm {
                    id: vm_id,
                    cores: rng.gen_range(1..=2),
                    start: 0.0,
                    finish: None,
                    cloudlets,
                });
            }

            let cores = vms.iter().map(|vm| vm.cores).sum::<u32>().max(1) * 2;
            hosts.push(SimHost {
                id: host_index as HostId + 1,
                cores,
                finish: None,
                vms,
            });
        }

        info!(
            "Synthetic engine: {} hosts, {} VMs, {} cloudlets (seed {})",
            config.hosts,
            next_vm - 1,
            next_cloudlet - 1,
            config.seed
        );
        Ok(Self {
            config,
            clock: 0.0,
            steps_taken: 0,
            hosts,
        })
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// True once every host shut down or the step budget is spent
    pub fn is_done(&self) -> bool {
        self.steps_taken >= self.config.steps || self.hosts.iter().all(|host| host.finish.is_some())
    }

    pub fn view(&self) -> TopologyView {
        TopologyView::new(self.hosts.iter().map(|host| host.view(self.clock)).collect())
    }

    /// Advance one step; returns the notifications it produced, oldest first
    pub fn step(&mut self) -> Vec<LifecycleEvent> {
        let started_at = self.clock;
        let dt = self.config.step_seconds;
        self.clock += dt;
        self.steps_taken += 1;
        let clock = self.clock;

        let mut events = Vec::new();
        for host in self.hosts.iter_mut().filter(|host| host.finish.is_none()) {
            for vm in host.vms.iter_mut().filter(|vm| vm.finish.is_none()) {
                for cloudlet in &mut vm.cloudlets {
                    if cloudlet.start.is_none() && cloudlet.submit_at <= started_at {
                        cloudlet.start = Some(started_at);
                    }
                }

                let running = vm.running();
                if running > 0 {
                    let rate = vm.cores as f64 * MIPS_PER_CORE / running as f64;
                    for cloudlet in vm.cloudlets.iter_mut().filter(|c| c.is_running()) {
                        let remaining = cloudlet.length as f64 - cloudlet.done_mi;
                        if remaining <= rate * dt {
                            let finish = started_at + remaining / rate;
                            cloudlet.done_mi = cloudlet.length as f64;
                            cloudlet.finish = Some(finish);
                            events.push(LifecycleEvent::CloudletFinished {
                                time: finish,
                                host_id: host.id,
                                cloudlet: cloudlet.view(clock, running),
                            });
                        } else {
                            cloudlet.done_mi += rate * dt;
                        }
                    }
                }

                if vm.cloudlets.iter().all(|c| c.finish.is_some()) {
                    vm.finish = Some(clock);
                    events.push(LifecycleEvent::VmDeallocated {
                        time: clock,
                        host_id: host.id,
                        vm: vm.view(clock),
                    });
                }
            }

            if host.vms.iter().all(|vm| vm.finish.is_some()) {
                host.finish = Some(clock);
                events.push(LifecycleEvent::HostShutdown {
                    time: clock,
                    host: host.view(clock),
                });
            }
        }

        events.sort_by(|a, b| a.time().total_cmp(&b.time()));
        debug!("Step {} (t={}): {} events", self.steps_taken, clock, events.len());
        events
    }
}

/// Counters from one synthetic run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticSummary {
    pub steps: usize,
    pub events: usize,
    pub unrouted_events: usize,
}

/// Drive a fresh session with a synthetic engine until it is done
pub fn run(
    config: SyntheticConfig,
    name: &str,
    recorder: RecorderConfig,
) -> Result<(SessionSnapshot, SyntheticSummary)> {
    let mut engine = SyntheticEngine::new(config)?;
    let session = SharedSession::new(RecordingSession::new(name, recorder));
    let adapter = EventAdapter::new(session.clone());
    let mut hub = NotificationHub::new();
    let mut summary = SyntheticSummary::default();

    adapter.tick(&mut hub, &engine.view(), engine.clock())?;
    while !engine.is_done() {
        for event in engine.step() {
            summary.events += 1;
            if hub.publish(&event) == 0 {
                summary.unrouted_events += 1;
            }
            adapter.sync(&mut hub);
        }
        adapter.tick(&mut hub, &engine.view(), engine.clock())?;
        summary.steps += 1;
    }

    let snapshot = session.finish(&engine.view(), engine.clock())?;
    Ok((snapshot, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            hosts: 2,
            vms_per_host: 2,
            cloudlets_per_vm: 2,
            steps: 200,
            step_seconds: 1.0,
            seed: 7,
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let no_hosts = SyntheticConfig {
            hosts: 0,
            ..Default::default()
        };
        assert!(SyntheticEngine::new(no_hosts).is_err());

        let bad_step = SyntheticConfig {
            step_seconds: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            SyntheticEngine::new(bad_step),
            Err(AppError::InvalidSynthetic(_))
        ));
    }

    #[test]
    fn test_initial_view_lists_everything() {
        let engine = SyntheticEngine::new(small()).unwrap();
        let view = engine.view();
        assert_eq!(view.hosts.len(), 2);
        assert_eq!(view.cloudlet_count(), 8);
        assert!(view.hosts.iter().all(|host| host.active));
    }

    #[test]
    fn test_run_to_completion() {
        let (snapshot, summary) = run(small(), "synthetic", RecorderConfig::default()).unwrap();

        assert!(summary.steps < 200);
        assert_eq!(summary.unrouted_events, 0);
        assert_eq!(snapshot.cloudlet_count(), 8);
        assert_eq!(snapshot.finished_cloudlet_count(), 8);

        for host in snapshot.hosts.values() {
            assert_eq!(host.end_times_seconds.len(), 1);
            for vm in host.vms.values() {
                assert_eq!(vm.end_times_seconds.len(), 1);
                for cloudlet in vm.cloudlets.values() {
                    assert_eq!(cloudlet.finished_length, cloudlet.length);
                    let (start, finish) = (cloudlet.start_time.unwrap(), cloudlet.finish_time.unwrap());
                    assert!(finish > start);
                    assert!(finish <= vm.end_times_seconds[0]);
                }
            }
        }
    }

    #[test]
    fn test_same_seed_same_history() {
        let (a, _) = run(small(), "a", RecorderConfig::default()).unwrap();
        let (b, _) = run(small(), "b", RecorderConfig::default()).unwrap();
        assert_eq!(a.hosts, b.hosts);
        assert_eq!(a.times_seconds, b.times_seconds);
    }

    #[test]
    fn test_step_budget_stops_run() {
        let config = SyntheticConfig {
            steps: 1,
            ..small()
        };
        let (snapshot, summary) = run(config, "short", RecorderConfig::lifecycle_only()).unwrap();
        assert_eq!(summary.steps, 1);
        assert_eq!(snapshot.times_seconds, vec![0.0, 1.0]);
        assert!(snapshot.hosts["1"].metrics.is_empty());
    }
}
