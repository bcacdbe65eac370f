//! Relational export
//!
//! A [`RelationalSink`] stores a snapshot as rows: one per session, tick
//! time, host, VM and cloudlet, plus one per metric sample. Entity rows are
//! find-or-insert on `(session, external id)`, so exporting the same session
//! twice reuses the surrogate keys of the first export.
//!
//! [`export_snapshot`] walks the snapshot top-down and brackets the walk in
//! `begin`/`commit`, rolling back on the first failure. The in-memory session
//! is never touched by an export.

use std::fmt::Debug;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::{CloudletSample, UtilizationSample};
use crate::snapshot::{CloudletSnapshot, HostSnapshot, SessionSnapshot, VmSnapshot};

/// Row store for exported sessions.
///
/// `time` on the find-or-insert methods is the entity's first recorded start,
/// `None` when it never started. It is only written when the row is created.
pub trait RelationalSink {
    /// Surrogate key of a stored row
    type Key: Copy + Debug;

    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn find_or_insert_session(&mut self, session: &SessionSnapshot) -> Result<Self::Key>;

    fn insert_time(&mut self, session: Self::Key, time: f64) -> Result<()>;

    fn find_or_insert_host(
        &mut self,
        session: Self::Key,
        host: &HostSnapshot,
        time: Option<f64>,
    ) -> Result<Self::Key>;

    fn find_or_insert_vm(
        &mut self,
        session: Self::Key,
        host: Self::Key,
        vm: &VmSnapshot,
        time: Option<f64>,
    ) -> Result<Self::Key>;

    fn find_or_insert_cloudlet(
        &mut self,
        session: Self::Key,
        vm: Self::Key,
        cloudlet: &CloudletSnapshot,
        time: Option<f64>,
    ) -> Result<Self::Key>;

    fn insert_host_metric(&mut self, host: Self::Key, sample: &UtilizationSample) -> Result<()>;

    fn insert_vm_metric(&mut self, vm: Self::Key, sample: &UtilizationSample) -> Result<()>;

    fn insert_cloudlet_metric(&mut self, cloudlet: Self::Key, sample: &CloudletSample) -> Result<()>;
}

/// Write `snapshot` into `sink` in one unit of work; returns the session key
pub fn export_snapshot<S: RelationalSink + ?Sized>(
    snapshot: &SessionSnapshot,
    sink: &mut S,
) -> Result<S::Key> {
    sink.begin()?;
    match write_rows(snapshot, sink) {
        Ok(key) => {
            sink.commit()?;
            info!(
                "Exported session '{}' ({} hosts, {} cloudlets) as {:?}",
                snapshot.name,
                snapshot.hosts.len(),
                snapshot.cloudlet_count(),
                key
            );
            Ok(key)
        }
        Err(e) => {
            warn!("Export of session '{}' failed: {}", snapshot.name, e);
            if let Err(rollback) = sink.rollback() {
                warn!("Rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}

fn write_rows<S: RelationalSink + ?Sized>(snapshot: &SessionSnapshot, sink: &mut S) -> Result<S::Key> {
    let session = sink.find_or_insert_session(snapshot)?;
    for &time in &snapshot.times_seconds {
        sink.insert_time(session, time)?;
    }

    for host in snapshot.hosts.values() {
        let host_key = sink.find_or_insert_host(session, host, host.start_times_seconds.first().copied())?;
        for sample in &host.metrics {
            sink.insert_host_metric(host_key, sample)?;
        }

        for vm in host.vms.values() {
            let vm_key = sink.find_or_insert_vm(session, host_key, vm, vm.start_times_seconds.first().copied())?;
            for sample in &vm.metrics {
                sink.insert_vm_metric(vm_key, sample)?;
            }

            for cloudlet in vm.cloudlets.values() {
                let cloudlet_key = sink.find_or_insert_cloudlet(session, vm_key, cloudlet, cloudlet.start_time)?;
                for sample in &cloudlet.metrics {
                    sink.insert_cloudlet_metric(cloudlet_key, sample)?;
                }
            }
        }
        debug!("Exported host {} as {:?}", host.id, host_key);
    }

    Ok(session)
}
