//! Engine-facing topology view
//!
//! A [`TopologyView`] is what the driving engine reports at one tick: the
//! ordered host list, each host's VMs, each VM's submitted cloudlets. Times
//! use the engine's `-1` sentinel for "not yet".

use serde::{Deserialize, Serialize};

use crate::types::{CloudletId, HostId, VmId};

/// Sentinel the engine reports for a time that has not happened yet
pub const NOT_YET: f64 = -1.0;

fn not_yet() -> f64 {
    NOT_YET
}

/// Snapshot of the engine's topology at one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyView {
    pub hosts: Vec<HostView>,
}

impl TopologyView {
    pub fn new(hosts: Vec<HostView>) -> Self {
        Self { hosts }
    }

    /// Resolve a host by id; `None` when the engine no longer knows it
    pub fn host(&self, id: HostId) -> Option<&HostView> {
        self.hosts.iter().find(|host| host.id == id)
    }

    /// Number of cloudlets across all hosts and VMs
    pub fn cloudlet_count(&self) -> usize {
        self.hosts
            .iter()
            .flat_map(|host| &host.vms)
            .map(|vm| vm.cloudlets.len())
            .sum()
    }
}

/// A host as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostView {
    pub id: HostId,
    pub num_cpu_cores: u32,
    /// Whether the host is currently powered on
    pub active: bool,
    #[serde(default = "not_yet")]
    pub start_time: f64,
    #[serde(default = "not_yet")]
    pub finish_time: f64,
    #[serde(default)]
    pub cpu_utilization: f64,
    #[serde(default)]
    pub ram_usage_mb: f64,
    #[serde(default)]
    pub vms: Vec<VmView>,
}

impl HostView {
    /// An active host started at `start_time` with no VMs
    pub fn new(id: HostId, num_cpu_cores: u32, start_time: f64) -> Self {
        HostView {
            id,
            num_cpu_cores,
            active: true,
            start_time,
            finish_time: NOT_YET,
            cpu_utilization: 0.0,
            ram_usage_mb: 0.0,
            vms: Vec::new(),
        }
    }

    pub fn with_vm(mut self, vm: VmView) -> Self {
        self.vms.push(vm);
        self
    }

    pub fn with_utilization(mut self, cpu: f64, ram_mb: f64) -> Self {
        self.cpu_utilization = cpu;
        self.ram_usage_mb = ram_mb;
        self
    }

    /// Mark the host as shut down at `finish_time`
    pub fn shut_down(mut self, finish_time: f64) -> Self {
        self.active = false;
        self.finish_time = finish_time;
        self
    }
}

/// A VM as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmView {
    pub id: VmId,
    pub num_cpu_cores: u32,
    #[serde(default = "not_yet")]
    pub start_time: f64,
    #[serde(default = "not_yet")]
    pub finish_time: f64,
    #[serde(default)]
    pub cpu_utilization: f64,
    #[serde(default)]
    pub ram_usage_mb: f64,
    #[serde(default)]
    pub ram_available_mb: f64,
    #[serde(default)]
    pub cloudlets: Vec<CloudletView>,
}

impl VmView {
    pub fn new(id: VmId, num_cpu_cores: u32, start_time: f64) -> Self {
        VmView {
            id,
            num_cpu_cores,
            start_time,
            finish_time: NOT_YET,
            cpu_utilization: 0.0,
            ram_usage_mb: 0.0,
            ram_available_mb: 0.0,
            cloudlets: Vec::new(),
        }
    }

    pub fn with_cloudlet(mut self, cloudlet: CloudletView) -> Self {
        self.cloudlets.push(cloudlet);
        self
    }

    pub fn with_utilization(mut self, cpu: f64, ram_used_mb: f64, ram_available_mb: f64) -> Self {
        self.cpu_utilization = cpu;
        self.ram_usage_mb = ram_used_mb;
        self.ram_available_mb = ram_available_mb;
        self
    }

    pub fn finished(mut self, finish_time: f64) -> Self {
        self.finish_time = finish_time;
        self
    }
}

/// A cloudlet as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudletView {
    pub id: CloudletId,
    pub vm_id: VmId,
    pub length: u64,
    #[serde(default = "one_core")]
    pub num_cpu_cores: u32,
    #[serde(default)]
    pub finished_length: u64,
    #[serde(default = "not_yet")]
    pub start_time: f64,
    #[serde(default = "not_yet")]
    pub finish_time: f64,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub cpu_utilization: f64,
    #[serde(default)]
    pub ram_utilization: f64,
}

fn one_core() -> u32 {
    1
}

impl CloudletView {
    /// A submitted, not yet started cloudlet
    pub fn new(id: CloudletId, vm_id: VmId, length: u64) -> Self {
        CloudletView {
            id,
            vm_id,
            length,
            num_cpu_cores: 1,
            finished_length: 0,
            start_time: NOT_YET,
            finish_time: NOT_YET,
            execution_time: 0.0,
            cpu_utilization: 0.0,
            ram_utilization: 0.0,
        }
    }

    /// Report progress: started at `start_time`, `finished_length` done
    pub fn progress(mut self, start_time: f64, finished_length: u64, execution_time: f64) -> Self {
        self.start_time = start_time;
        self.finished_length = finished_length;
        self.execution_time = execution_time;
        self
    }

    pub fn finished(mut self, finish_time: f64) -> Self {
        self.finish_time = finish_time;
        self
    }
}
