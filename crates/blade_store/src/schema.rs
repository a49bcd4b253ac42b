use rusqlite::{params, Connection, OptionalExtension};

use crate::{Result, StoreError};

/// Schema version this binary writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// What `migrate` found and changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// `table.column` entries added by ALTER TABLE.
    pub added_columns: Vec<String>,
    pub created_preparation: bool,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.from_version == self.to_version
            && self.added_columns.is_empty()
            && !self.created_preparation
    }
}

const EXPERIMENT_COLUMNS: &[(&str, &str)] = &[
    ("command", "VARCHAR NOT NULL DEFAULT ''"),
    ("sub_command", "VARCHAR NOT NULL DEFAULT ''"),
    ("flag", "VARCHAR NOT NULL DEFAULT ''"),
    ("status", "VARCHAR NOT NULL DEFAULT ''"),
    ("error", "VARCHAR NOT NULL DEFAULT ''"),
    ("create_time", "VARCHAR NOT NULL DEFAULT ''"),
    ("update_time", "VARCHAR NOT NULL DEFAULT ''"),
];

// (version that introduced the column, column, declaration)
const PREPARATION_COLUMNS: &[(u32, &str, &str)] = &[
    (0, "program_type", "VARCHAR NOT NULL DEFAULT ''"),
    (0, "process", "VARCHAR NOT NULL DEFAULT ''"),
    (0, "port", "VARCHAR NOT NULL DEFAULT ''"),
    (0, "status", "VARCHAR NOT NULL DEFAULT ''"),
    (0, "error", "VARCHAR NOT NULL DEFAULT ''"),
    (0, "create_time", "VARCHAR NOT NULL DEFAULT ''"),
    (0, "update_time", "VARCHAR NOT NULL DEFAULT ''"),
    (1, "pid", "VARCHAR NOT NULL DEFAULT ''"),
];

const EXPERIMENT_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS experiment (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uid VARCHAR(32) NOT NULL,
        command VARCHAR NOT NULL DEFAULT '',
        sub_command VARCHAR NOT NULL DEFAULT '',
        flag VARCHAR NOT NULL DEFAULT '',
        status VARCHAR NOT NULL DEFAULT '',
        error VARCHAR NOT NULL DEFAULT '',
        create_time VARCHAR NOT NULL DEFAULT '',
        update_time VARCHAR NOT NULL DEFAULT ''
    );
"#;

const EXPERIMENT_INDEXES: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS exp_uid_uidx ON experiment(uid);
    CREATE INDEX IF NOT EXISTS exp_command_idx ON experiment(command);
    CREATE INDEX IF NOT EXISTS exp_status_idx ON experiment(status);
"#;

const PREPARATION_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS preparation (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uid VARCHAR(32) NOT NULL,
        program_type VARCHAR NOT NULL DEFAULT '',
        process VARCHAR NOT NULL DEFAULT '',
        port VARCHAR NOT NULL DEFAULT '',
        pid VARCHAR NOT NULL DEFAULT '',
        status VARCHAR NOT NULL DEFAULT '',
        error VARCHAR NOT NULL DEFAULT '',
        create_time VARCHAR NOT NULL DEFAULT '',
        update_time VARCHAR NOT NULL DEFAULT ''
    );
"#;

const PREPARATION_INDEXES: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS pre_uid_uidx ON preparation(uid);
    CREATE INDEX IF NOT EXISTS pre_type_process_idx ON preparation(program_type, process);
    CREATE INDEX IF NOT EXISTS pre_status_idx ON preparation(status);
"#;

pub(crate) fn migrate(conn: &mut Connection) -> Result<MigrationReport> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );",
    )?;

    let mut report = MigrationReport::default();

    tx.execute_batch(EXPERIMENT_DDL)?;
    for (col, decl) in EXPERIMENT_COLUMNS {
        if add_column_if_missing(&tx, "experiment", col, decl)? {
            report.added_columns.push(format!("experiment.{col}"));
        }
    }
    tx.execute_batch(EXPERIMENT_INDEXES)?;

    let stored = read_version(&tx)?;
    report.from_version = stored;

    if stored == CURRENT_SCHEMA_VERSION {
        align_preparation(&tx, &mut report)?;
        report.to_version = stored;
        tx.commit()?;
        return Ok(report);
    }

    tracing::info!(
        "migrating datastore schema from version {} to {}",
        stored,
        CURRENT_SCHEMA_VERSION
    );
    if table_exists(&tx, "preparation")? {
        for (since, col, decl) in PREPARATION_COLUMNS {
            if *since > CURRENT_SCHEMA_VERSION {
                continue;
            }
            if add_column_if_missing(&tx, "preparation", col, decl)? {
                tracing::info!("added column preparation.{}", col);
                report.added_columns.push(format!("preparation.{col}"));
            }
        }
        tx.execute_batch(PREPARATION_INDEXES)?;
    } else {
        tx.execute_batch(PREPARATION_DDL)?;
        tx.execute_batch(PREPARATION_INDEXES)?;
        report.created_preparation = true;
    }

    let target = stored.max(CURRENT_SCHEMA_VERSION);
    write_version(&tx, target)?;
    report.to_version = target;
    tx.commit()?;
    Ok(report)
}

// Idempotent: creates what is missing and nothing else.
fn align_preparation(conn: &Connection, report: &mut MigrationReport) -> Result<()> {
    if !table_exists(conn, "preparation")? {
        conn.execute_batch(PREPARATION_DDL)?;
        report.created_preparation = true;
    }
    for (_, col, decl) in PREPARATION_COLUMNS {
        if add_column_if_missing(conn, "preparation", col, decl)? {
            report.added_columns.push(format!("preparation.{col}"));
        }
    }
    conn.execute_batch(PREPARATION_INDEXES)?;
    Ok(())
}

/// Stored schema version; falls back to a legacy `user_version` pragma.
pub(crate) fn read_version(conn: &Connection) -> Result<u32> {
    let stored: Option<i64> = conn
        .query_row("SELECT version FROM schema_meta WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    let version = match stored {
        Some(v) => v,
        None => conn.pragma_query_value(None, "user_version", |row| row.get::<_, i64>(0))?,
    };
    u32::try_from(version)
        .map_err(|_| StoreError::Migration(format!("invalid stored schema version {version}")))
}

fn write_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_meta (id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        params![version],
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn has_col(conn: &Connection, table: &str, col: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == col {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    col: &str,
    decl: &str,
) -> rusqlite::Result<bool> {
    if has_col(conn, table, col)? {
        return Ok(false);
    }
    conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {col} {decl}"), [])?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_is_created_at_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        let report = migrate(&mut conn).unwrap();
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
        assert!(report.created_preparation);
        assert!(report.added_columns.is_empty());
        assert!(has_col(&conn, "preparation", "pid").unwrap());

        let again = migrate(&mut conn).unwrap();
        assert!(again.is_noop(), "{again:?}");
    }

    #[test]
    fn legacy_user_version_is_adopted() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute_batch(PREPARATION_DDL).unwrap();
        let report = migrate(&mut conn).unwrap();
        assert_eq!(report.from_version, 1);
        assert_eq!(read_version(&conn).unwrap(), 1);
    }

    #[test]
    fn newer_version_is_never_lowered() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        write_version(&conn, CURRENT_SCHEMA_VERSION + 3).unwrap();
        let report = migrate(&mut conn).unwrap();
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION + 3);
        assert_eq!(read_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION + 3);
    }
}
