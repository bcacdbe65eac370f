//! Exported session snapshot
//!
//! One versioned schema, decoupled from the in-memory records. Maps are keyed
//! by the decimal id string so the JSON form matches what viewers index by:
//!
//! ```text
//! SessionSnapshot
//!  └── hosts: { "1": HostSnapshot
//!                  └── vms: { "10": VmSnapshot
//!                                └── cloudlets: { "100": CloudletSnapshot } } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::{CloudletSample, UtilizationSample};
use crate::types::{CloudletId, CloudletRecord, HostId, HostRecord, VmId, VmRecord};

/// Bumped whenever a field is renamed or removed
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Point-in-time copy of a whole recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub schema_version: u32,
    /// Session id (UUID v4)
    pub id: String,
    pub name: String,
    /// Wall-clock creation time (RFC 3339)
    pub started_at: String,
    /// Wall-clock completion time (RFC 3339), set once the session is finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Latest simulation clock observed (seconds)
    pub duration: f64,
    /// Every distinct tick time, in call order
    pub times_seconds: Vec<f64>,
    pub hosts: BTreeMap<String, HostSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSnapshot {
    pub id: HostId,
    pub num_cpu_cores: u32,
    pub start_times_seconds: Vec<f64>,
    pub end_times_seconds: Vec<f64>,
    pub vms: BTreeMap<String, VmSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<UtilizationSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSnapshot {
    pub id: VmId,
    pub host_id: HostId,
    pub num_cpu_cores: u32,
    pub start_times_seconds: Vec<f64>,
    pub end_times_seconds: Vec<f64>,
    pub cloudlets: BTreeMap<String, CloudletSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<UtilizationSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudletSnapshot {
    pub id: CloudletId,
    /// `null` until the engine reports a start
    pub start_time: Option<f64>,
    /// `null` until the engine reports a finish
    pub finish_time: Option<f64>,
    pub length: u64,
    pub finished_length: u64,
    pub execution_time: f64,
    pub num_cpu_cores: u32,
    pub vm_id: VmId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<CloudletSample>,
}

impl SessionSnapshot {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn vm_count(&self) -> usize {
        self.hosts.values().map(|host| host.vms.len()).sum()
    }

    pub fn cloudlet_count(&self) -> usize {
        self.hosts
            .values()
            .flat_map(|host| host.vms.values())
            .map(|vm| vm.cloudlets.len())
            .sum()
    }

    /// Cloudlets with a recorded finish time
    pub fn finished_cloudlet_count(&self) -> usize {
        self.hosts
            .values()
            .flat_map(|host| host.vms.values())
            .flat_map(|vm| vm.cloudlets.values())
            .filter(|cloudlet| cloudlet.finish_time.is_some())
            .count()
    }
}

impl From<&HostRecord> for HostSnapshot {
    fn from(host: &HostRecord) -> Self {
        HostSnapshot {
            id: host.id,
            num_cpu_cores: host.num_cpu_cores,
            start_times_seconds: host.timeline.start_times().to_vec(),
            end_times_seconds: host.timeline.end_times().to_vec(),
            vms: host
                .vms
                .iter()
                .map(|(id, vm)| (id.to_string(), VmSnapshot::from(vm)))
                .collect(),
            metrics: host.metrics.samples().to_vec(),
        }
    }
}

impl From<&VmRecord> for VmSnapshot {
    fn from(vm: &VmRecord) -> Self {
        VmSnapshot {
            id: vm.id,
            host_id: vm.host_id,
            num_cpu_cores: vm.num_cpu_cores,
            start_times_seconds: vm.timeline.start_times().to_vec(),
            end_times_seconds: vm.timeline.end_times().to_vec(),
            cloudlets: vm
                .cloudlets
                .iter()
                .map(|(id, cloudlet)| (id.to_string(), CloudletSnapshot::from(cloudlet)))
                .collect(),
            metrics: vm.metrics.samples().to_vec(),
        }
    }
}

impl From<&CloudletRecord> for CloudletSnapshot {
    fn from(cloudlet: &CloudletRecord) -> Self {
        CloudletSnapshot {
            id: cloudlet.id,
            start_time: cloudlet.start_time(),
            finish_time: cloudlet.finish_time(),
            length: cloudlet.length,
            finished_length: cloudlet.finished_length(),
            execution_time: cloudlet.execution_time(),
            num_cpu_cores: cloudlet.num_cpu_cores,
            vm_id: cloudlet.vm_id,
            metrics: cloudlet.metrics.samples().to_vec(),
        }
    }
}
