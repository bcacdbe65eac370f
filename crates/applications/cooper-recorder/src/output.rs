//! Where a finished snapshot goes: a JSON file or stdout, and optionally a
//! SQLite database.

use std::fmt::Write as _;
use std::path::Path;

use cooper_core::{SessionSnapshot, export_snapshot};
use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;
use crate::sqlite::SqliteSink;

/// Write the snapshot as pretty JSON; stdout when `path` is `None`
pub fn write_snapshot(snapshot: &SessionSnapshot, path: Option<&Path>) -> Result<()> {
    let json = snapshot.to_json_pretty()?;
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, json)?;
            info!("Wrote snapshot to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Export into the SQLite database at `path`; returns the simulation row id
pub fn export_to_sqlite(snapshot: &SessionSnapshot, path: &Path) -> Result<i64> {
    let mut sink = SqliteSink::open(path)?;
    let key = export_snapshot(snapshot, &mut sink)?;
    info!("Exported session {} to {} (simulation {})", snapshot.id, path.display(), key);
    Ok(key)
}

/// Apply every output `config` asks for
pub fn deliver(snapshot: &SessionSnapshot, config: &AppConfig) -> Result<()> {
    write_snapshot(snapshot, config.output_path.as_deref())?;
    if let Some(db) = &config.database_path {
        export_to_sqlite(snapshot, db)?;
    }
    Ok(())
}

pub fn load_snapshot(path: impl AsRef<Path>) -> Result<SessionSnapshot> {
    let text = std::fs::read_to_string(path)?;
    Ok(SessionSnapshot::from_json(&text)?)
}

/// Human-readable overview for `cooper inspect`
pub fn summarize(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session '{}' ({})", snapshot.name, snapshot.id);
    let _ = writeln!(
        out,
        "  started {}, {}",
        snapshot.started_at,
        match &snapshot.finished_at {
            Some(at) => format!("finished {}", at),
            None => "still recording".to_string(),
        }
    );
    let _ = writeln!(
        out,
        "  duration {}s over {} ticks",
        snapshot.duration,
        snapshot.times_seconds.len()
    );
    let _ = writeln!(
        out,
        "  {} hosts, {} VMs, {}/{} cloudlets finished",
        snapshot.hosts.len(),
        snapshot.vm_count(),
        snapshot.finished_cloudlet_count(),
        snapshot.cloudlet_count()
    );
    for host in snapshot.hosts.values() {
        let _ = writeln!(
            out,
            "  host {}: {} cores, {} activations, {} shutdowns, {} VMs",
            host.id,
            host.num_cpu_cores,
            host.start_times_seconds.len(),
            host.end_times_seconds.len(),
            host.vms.len()
        );
    }
    out
}
