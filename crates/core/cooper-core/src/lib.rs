//! # Cooper Core
//!
//! Idempotent recording of a hierarchical simulation topology.
//!
//! ## Architecture
//!
//! ```text
//! engine poll ──► RecordingSession::tick ───────┐
//!                                               ├──► Reconciler ──► HostRegistry
//! engine push ──► EventAdapter ──► apply_event ─┘         (Host → Vm → Cloudlet)
//!                                                              │
//!                              SessionSnapshot ◄── snapshot ◄──┘
//!                                   │
//!                                   └──► export_snapshot ──► RelationalSink
//! ```
//!
//! The engine owns allocation and scheduling. This crate only keeps what the
//! engine reported:
//! - lifecycle timestamps, appended without consecutive duplicates
//! - optional utilization samples per entity and tick
//! - cloudlet progress, frozen once a finish is recorded
//!
//! Both update paths reduce to the same get-or-create and append primitives,
//! so an event and a later poll reporting the same transition converge to one
//! entry.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod persist;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod timeline;
pub mod topology;
pub mod types;

// Session
pub use config::RecorderConfig;
pub use session::{RecordingSession, SharedSession};

// Engine input
pub use events::{
    EventAdapter, LifecycleEvent, Listener, ListenerAction, NotificationHub, NotificationSource,
    Topic,
};
pub use topology::{CloudletView, HostView, NOT_YET, TopologyView, VmView};

// Records
pub use metrics::{CloudletSample, MetricSeries, Timestamped, UtilizationSample};
pub use reconciler::{HostRegistry, Reconciler, TickReport};
pub use registry::{EntityRegistry, Identified};
pub use timeline::LifecycleTimeline;
pub use types::{
    CloudletChange, CloudletId, CloudletRecord, EntityKey, HostId, HostRecord, VmId, VmRecord,
};

// Export
pub use persist::{RelationalSink, export_snapshot};
pub use snapshot::{
    CloudletSnapshot, HostSnapshot, SNAPSHOT_SCHEMA_VERSION, SessionSnapshot, VmSnapshot,
};

// Errors
pub use error::{EntityIssue, RecorderError, Result};
