//! Recorded entities
//!
//! Records are created lazily on first observation and never removed. Each
//! parent owns its children's registry exclusively.

use crate::metrics::{CloudletSample, MetricSeries, UtilizationSample};
use crate::registry::{EntityRegistry, Identified};
use crate::timeline::LifecycleTimeline;
use crate::topology::{CloudletView, HostView, VmView};

/// External (engine-assigned) host id
pub type HostId = u64;

/// External VM id, unique across all hosts of a session
pub type VmId = u64;

/// External cloudlet id, unique across all VMs of a session
pub type CloudletId = u64;

/// Identifies an entity anywhere in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    Host(HostId),
    Vm(VmId),
    Cloudlet(CloudletId),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Host(id) => write!(f, "host {}", id),
            EntityKey::Vm(id) => write!(f, "vm {}", id),
            EntityKey::Cloudlet(id) => write!(f, "cloudlet {}", id),
        }
    }
}

/// A unit of work executed on a VM
#[derive(Debug, Clone)]
pub struct CloudletRecord {
    pub id: CloudletId,
    pub vm_id: VmId,
    /// Total work (million instructions)
    pub length: u64,
    pub num_cpu_cores: u32,
    finished_length: u64,
    execution_time: f64,
    start_time: Option<f64>,
    finish_time: Option<f64>,
    pub metrics: MetricSeries<CloudletSample>,
}

/// What changed when a cloudlet was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloudletChange {
    pub started: bool,
    pub finished: bool,
}

impl CloudletRecord {
    /// Build a record from the first observation under `vm_id`; progress is
    /// left at zero
    pub fn new(vm_id: VmId, view: &CloudletView) -> Self {
        CloudletRecord {
            id: view.id,
            vm_id,
            length: view.length,
            num_cpu_cores: view.num_cpu_cores,
            finished_length: 0,
            execution_time: 0.0,
            start_time: None,
            finish_time: None,
            metrics: MetricSeries::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn finish_time(&self) -> Option<f64> {
        self.finish_time
    }

    pub fn finished_length(&self) -> u64 {
        self.finished_length
    }

    pub fn execution_time(&self) -> f64 {
        self.execution_time
    }

    /// Fold one observation into the record.
    ///
    /// Start is set by the first non-negative start, finish by the first
    /// positive finish. Progress only moves forward and stops moving once a
    /// finish time is recorded.
    pub fn observe(&mut self, view: &CloudletView) -> CloudletChange {
        let mut change = CloudletChange::default();
        if self.is_finished() {
            return change;
        }

        if self.start_time.is_none() && view.start_time >= 0.0 {
            self.start_time = Some(view.start_time);
            change.started = true;
        }

        self.finished_length = self.finished_length.max(view.finished_length);
        self.execution_time = self.execution_time.max(view.execution_time);

        if view.finish_time > 0.0 {
            self.finish_time = Some(view.finish_time);
            change.finished = true;
        }

        change
    }

    /// Force a finish at `time` when the engine reported completion without a
    /// usable finish time
    pub fn finish_at(&mut self, time: f64) -> bool {
        if self.is_finished() {
            return false;
        }
        self.finish_time = Some(time);
        true
    }
}

impl Identified for CloudletRecord {
    type Id = CloudletId;

    fn id(&self) -> CloudletId {
        self.id
    }
}

/// A virtual machine and the cloudlets it has run
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub id: VmId,
    pub host_id: HostId,
    pub num_cpu_cores: u32,
    pub timeline: LifecycleTimeline,
    pub metrics: MetricSeries<UtilizationSample>,
    pub cloudlets: EntityRegistry<CloudletId, CloudletRecord>,
}

impl VmRecord {
    pub fn new(host_id: HostId, view: &VmView) -> Self {
        VmRecord {
            id: view.id,
            host_id,
            num_cpu_cores: view.num_cpu_cores,
            timeline: LifecycleTimeline::new(),
            metrics: MetricSeries::new(),
            cloudlets: EntityRegistry::new(),
        }
    }
}

impl Identified for VmRecord {
    type Id = VmId;

    fn id(&self) -> VmId {
        self.id
    }
}

/// A physical machine; may be activated and shut down several times
#[derive(Debug, Clone)]
pub struct HostRecord {
    pub id: HostId,
    pub num_cpu_cores: u32,
    pub timeline: LifecycleTimeline,
    pub metrics: MetricSeries<UtilizationSample>,
    pub vms: EntityRegistry<VmId, VmRecord>,
}

impl HostRecord {
    pub fn new(view: &HostView) -> Self {
        HostRecord {
            id: view.id,
            num_cpu_cores: view.num_cpu_cores,
            timeline: LifecycleTimeline::new(),
            metrics: MetricSeries::new(),
            vms: EntityRegistry::new(),
        }
    }
}

impl Identified for HostRecord {
    type Id = HostId;

    fn id(&self) -> HostId {
        self.id
    }
}
