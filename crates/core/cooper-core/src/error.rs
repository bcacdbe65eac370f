//! Error types for the recording core

use thiserror::Error;

use crate::types::{CloudletId, HostId, VmId};

/// Recorder result type
pub type Result<T> = std::result::Result<T, RecorderError>;

/// Errors that can surface from a recording session
#[derive(Error, Debug)]
pub enum RecorderError {
    /// The session was already finished and no longer accepts updates
    #[error("Session {0} is already finished")]
    SessionFinished(String),

    /// Writing the snapshot to a relational sink failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The driver passed a NaN or infinite clock value
    #[error("Invalid simulation time: {0}")]
    InvalidTime(f64),
}

impl RecorderError {
    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// A problem with a single entity during reconciliation.
///
/// These never abort a tick; they are collected in the
/// [`TickReport`](crate::reconciler::TickReport) and logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntityIssue {
    /// A VM was reported under a different host than the one it was recorded under
    #[error("VM {vm_id} reported under host {reported} but recorded under host {recorded}")]
    VmReparented {
        vm_id: VmId,
        recorded: HostId,
        reported: HostId,
    },

    /// A cloudlet was reported under a different VM than the one it was recorded under
    #[error("Cloudlet {cloudlet_id} reported under VM {reported} but recorded under VM {recorded}")]
    CloudletReparented {
        cloudlet_id: CloudletId,
        recorded: VmId,
        reported: VmId,
    },

    /// An event referenced a host that has never been recorded
    #[error("Host {0} is not recorded")]
    UnknownHost(HostId),

    /// An event referenced a VM that has never been recorded under its host
    #[error("VM {vm_id} is not recorded under host {host_id}")]
    UnknownVm { host_id: HostId, vm_id: VmId },

    /// A timestamp was NaN or infinite
    #[error("Non-finite {field} on {entity}")]
    NonFiniteTime { entity: String, field: &'static str },
}
