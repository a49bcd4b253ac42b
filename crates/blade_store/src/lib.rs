//! Durable record store backed by a single SQLite file.
//!
//! Two tables hold the lifecycle of experiments and preparations. The schema
//! only ever grows: missing columns are added in place and the schema
//! version in `schema_meta` never goes backwards.

mod experiment;
pub mod path;
mod preparation;
mod query;
mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Row};
use thiserror::Error;

pub use experiment::ExperimentRecord;
pub use preparation::PreparationRecord;
pub use query::{ExperimentQuery, Pagination, PreparationQuery};
pub use schema::{MigrationReport, CURRENT_SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("store connection lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct Store {
    conn: Mutex<Connection>,
    report: MigrationReport,
}

impl Store {
    /// Opens (or creates) the datastore and brings its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;

        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(
                "datastore {} journal_mode is '{}', continuing without WAL",
                path.display(),
                mode
            );
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        let report = schema::migrate(&mut conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
            report,
        })
    }

    /// What the last open did to the schema.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        schema::read_version(&conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Sortable wall-clock timestamp with nanosecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// Columns added by ALTER TABLE on older files may hold NULL.
fn text(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}
