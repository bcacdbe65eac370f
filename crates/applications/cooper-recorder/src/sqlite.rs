//! SQLite relational sink
//!
//! ```text
//! simulation ─┬─ time
//!             ├─ host ─── host_metric
//!             ├─ vm ───── vm_metric        (vm.host_id → host)
//!             └─ cloudlet ─ cloudlet_metric (cloudlet.vm_id → vm)
//! ```
//!
//! Entity tables are unique on `(simulation_id, cloudsim_id)`; metric and
//! time tables are unique per simulation time, written with `INSERT OR
//! IGNORE`. Exporting the same session again therefore adds no rows.

use std::path::Path;

use cooper_core::{
    CloudletSample, CloudletSnapshot, HostSnapshot, RecorderError, RelationalSink, SessionSnapshot,
    UtilizationSample, VmSnapshot,
};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::Result;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS simulation (
    id INTEGER PRIMARY KEY,
    session_uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    duration_seconds REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS time (
    simulation_id INTEGER NOT NULL REFERENCES simulation(id),
    simulation_time_seconds REAL NOT NULL,
    UNIQUE (simulation_id, simulation_time_seconds)
);
CREATE TABLE IF NOT EXISTS host (
    id INTEGER PRIMARY KEY,
    simulation_id INTEGER NOT NULL REFERENCES simulation(id),
    cloudsim_id INTEGER NOT NULL,
    num_cpu_cores INTEGER NOT NULL,
    start_time_seconds REAL,
    UNIQUE (simulation_id, cloudsim_id)
);
CREATE TABLE IF NOT EXISTS vm (
    id INTEGER PRIMARY KEY,
    simulation_id INTEGER NOT NULL REFERENCES simulation(id),
    cloudsim_id INTEGER NOT NULL,
    host_id INTEGER NOT NULL REFERENCES host(id),
    num_cpu_cores INTEGER NOT NULL,
    start_time_seconds REAL,
    UNIQUE (simulation_id, cloudsim_id)
);
CREATE TABLE IF NOT EXISTS cloudlet (
    id INTEGER PRIMARY KEY,
    simulation_id INTEGER NOT NULL REFERENCES simulation(id),
    cloudsim_id INTEGER NOT NULL,
    vm_id INTEGER NOT NULL REFERENCES vm(id),
    length INTEGER NOT NULL,
    start_time_seconds REAL,
    UNIQUE (simulation_id, cloudsim_id)
);
CREATE TABLE IF NOT EXISTS host_metric (
    host_id INTEGER NOT NULL REFERENCES host(id),
    simulation_time_seconds REAL NOT NULL,
    cpu_utilization REAL NOT NULL,
    ram_usage_mb REAL NOT NULL,
    UNIQUE (host_id, simulation_time_seconds)
);
CREATE TABLE IF NOT EXISTS vm_metric (
    vm_id INTEGER NOT NULL REFERENCES vm(id),
    simulation_time_seconds REAL NOT NULL,
    cpu_utilization REAL NOT NULL,
    ram_available_mb REAL,
    ram_allocated_mb REAL NOT NULL,
    UNIQUE (vm_id, simulation_time_seconds)
);
CREATE TABLE IF NOT EXISTS cloudlet_metric (
    cloudlet_id INTEGER NOT NULL REFERENCES cloudlet(id),
    simulation_time_seconds REAL NOT NULL,
    cpu_utilization REAL NOT NULL,
    ram_utilization REAL NOT NULL,
    UNIQUE (cloudlet_id, simulation_time_seconds)
);
";

/// Tables a caller may count rows of
pub const TABLES: [&str; 8] = [
    "simulation",
    "time",
    "host",
    "vm",
    "cloudlet",
    "host_metric",
    "vm_metric",
    "cloudlet_metric",
];

/// [`RelationalSink`] over a SQLite connection
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        debug!("Opened SQLite database {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if user_version > SCHEMA_VERSION {
            return Err(RecorderError::persistence(format!(
                "database schema version {} is newer than supported {}",
                user_version, SCHEMA_VERSION
            ))
            .into());
        }

        conn.execute_batch(SCHEMA_SQL)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(Self { conn })
    }

    /// Number of rows in one of [`TABLES`]
    pub fn row_count(&self, table: &str) -> Result<u64> {
        if !TABLES.contains(&table) {
            return Err(RecorderError::persistence(format!("unknown table {}", table)).into());
        }
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn db_error(e: rusqlite::Error) -> RecorderError {
    RecorderError::persistence(e.to_string())
}

/// External ids and lengths are u64; SQLite integers are i64
fn sql_int(value: u64) -> cooper_core::Result<i64> {
    i64::try_from(value)
        .map_err(|_| RecorderError::persistence(format!("{} does not fit a SQLite integer", value)))
}

impl SqliteSink {
    fn find(&self, table: &str, session: i64, cloudsim_id: i64) -> cooper_core::Result<Option<i64>> {
        self.conn
            .query_row(
                &format!("SELECT id FROM {} WHERE simulation_id = ?1 AND cloudsim_id = ?2", table),
                params![session, cloudsim_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)
    }
}

impl RelationalSink for SqliteSink {
    type Key = i64;

    fn begin(&mut self) -> cooper_core::Result<()> {
        self.conn.execute_batch("BEGIN").map_err(db_error)
    }

    fn commit(&mut self) -> cooper_core::Result<()> {
        self.conn.execute_batch("COMMIT").map_err(db_error)
    }

    fn rollback(&mut self) -> cooper_core::Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(db_error)
    }

    fn find_or_insert_session(&mut self, session: &SessionSnapshot) -> cooper_core::Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM simulation WHERE session_uuid = ?1",
                params![session.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;

        match existing {
            Some(id) => {
                // A later export of a live session carries a newer clock
                self.conn
                    .execute(
                        "UPDATE simulation SET finished_at = ?1, duration_seconds = ?2 WHERE id = ?3",
                        params![session.finished_at, session.duration, id],
                    )
                    .map_err(db_error)?;
                Ok(id)
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO simulation (session_uuid, name, started_at, finished_at, duration_seconds)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            session.id,
                            session.name,
                            session.started_at,
                            session.finished_at,
                            session.duration
                        ],
                    )
                    .map_err(db_error)?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    fn insert_time(&mut self, session: i64, time: f64) -> cooper_core::Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO time (simulation_id, simulation_time_seconds) VALUES (?1, ?2)",
                params![session, time],
            )
            .map_err(db_error)?;
        Ok(())
    }

    fn find_or_insert_host(
        &mut self,
        session: i64,
        host: &HostSnapshot,
        time: Option<f64>,
    ) -> cooper_core::Result<i64> {
        let cloudsim_id = sql_int(host.id)?;
        if let Some(id) = self.find("host", session, cloudsim_id)? {
            return Ok(id);
        }
        self.conn
            .execute(
                "INSERT INTO host (simulation_id, cloudsim_id, num_cpu_cores, start_time_seconds)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session, cloudsim_id, host.num_cpu_cores, time],
            )
            .map_err(db_error)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_or_insert_vm(
        &mut self,
        session: i64,
        host: i64,
        vm: &VmSnapshot,
        time: Option<f64>,
    ) -> cooper_core::Result<i64> {
        let cloudsim_id = sql_int(vm.id)?;
        if let Some(id) = self.find("vm", session, cloudsim_id)? {
            return Ok(id);
        }
        self.conn
            .execute(
                "INSERT INTO vm (simulation_id, cloudsim_id, host_id, num_cpu_cores, start_time_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session, cloudsim_id, host, vm.num_cpu_cores, time],
            )
            .map_err(db_error)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_or_insert_cloudlet(
        &mut self,
        session: i64,
        vm: i64,
        cloudlet: &CloudletSnapshot,
        time: Option<f64>,
    ) -> cooper_core::Result<i64> {
        let cloudsim_id = sql_int(cloudlet.id)?;
        if let Some(id) = self.find("cloudlet", session, cloudsim_id)? {
            return Ok(id);
        }
        self.conn
            .execute(
                "INSERT INTO cloudlet (simulation_id, cloudsim_id, vm_id, length, start_time_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session, cloudsim_id, vm, sql_int(cloudlet.length)?, time],
            )
            .map_err(db_error)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_host_metric(&mut self, host: i64, sample: &UtilizationSample) -> cooper_core::Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO host_metric
                 (host_id, simulation_time_seconds, cpu_utilization, ram_usage_mb)
                 VALUES (?1, ?2, ?3, ?4)",
                params![host, sample.simulation_time, sample.cpu_utilization, sample.ram_usage_mb],
            )
            .map_err(db_error)?;
        Ok(())
    }

    fn insert_vm_metric(&mut self, vm: i64, sample: &UtilizationSample) -> cooper_core::Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO vm_metric
                 (vm_id, simulation_time_seconds, cpu_utilization, ram_available_mb, ram_allocated_mb)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    vm,
                    sample.simulation_time,
                    sample.cpu_utilization,
                    sample.ram_available_mb,
                    sample.ram_usage_mb
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }

    fn insert_cloudlet_metric(&mut self, cloudlet: i64, sample: &CloudletSample) -> cooper_core::Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO cloudlet_metric
                 (cloudlet_id, simulation_time_seconds, cpu_utilization, ram_utilization)
                 VALUES (?1, ?2, ?3, ?4)",
                params![cloudlet, sample.simulation_time, sample.cpu_utilization, sample.ram_utilization],
            )
            .map_err(db_error)?;
        Ok(())
    }
}
