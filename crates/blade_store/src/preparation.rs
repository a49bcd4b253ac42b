use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::query::{order, Pagination, Where};
use crate::{now_timestamp, text, PreparationQuery, Result, Store};

/// A runtime attachment, such as a sandbox agent inside a JVM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationRecord {
    pub id: i64,
    pub uid: String,
    pub program_type: String,
    pub process: String,
    pub port: String,
    pub pid: String,
    pub status: String,
    pub error: String,
    pub create_time: String,
    pub update_time: String,
}

const COLUMNS: &str =
    "id, uid, program_type, process, port, pid, status, error, create_time, update_time";

impl PreparationRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PreparationRecord {
            id: row.get(0)?,
            uid: row.get(1)?,
            program_type: text(row, 2)?,
            process: text(row, 3)?,
            port: text(row, 4)?,
            pid: text(row, 5)?,
            status: text(row, 6)?,
            error: text(row, 7)?,
            create_time: text(row, 8)?,
            update_time: text(row, 9)?,
        })
    }
}

impl Store {
    pub fn insert_preparation(&self, record: &mut PreparationRecord) -> Result<()> {
        if record.create_time.is_empty() {
            record.create_time = now_timestamp();
        }
        if record.update_time.is_empty() {
            record.update_time = record.create_time.clone();
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO preparation (uid, program_type, process, port, pid, status, error, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.uid,
                record.program_type,
                record.process,
                record.port,
                record.pid,
                record.status,
                record.error,
                record.create_time,
                record.update_time,
            ],
        )?;
        record.id = conn.last_insert_rowid();
        Ok(())
    }

    pub fn query_preparation_by_uid(&self, uid: &str) -> Result<Option<PreparationRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM preparation WHERE uid = ?1"),
                params![uid],
                PreparationRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// First `Running` preparation of `program_type`, narrowed by whichever
    /// of `process` and `pid` are non-empty.
    pub fn query_running_preparation(
        &self,
        program_type: &str,
        process: &str,
        pid: &str,
    ) -> Result<Option<PreparationRecord>> {
        let mut filter = Where::default();
        filter.eq("program_type", program_type);
        filter.eq("status", "Running");
        filter.eq("pid", pid);
        filter.eq("process", process);

        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM preparation{} ORDER BY id ASC LIMIT 1",
                    filter.sql()
                ),
                params_from_iter(filter.params.iter()),
                PreparationRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn update_preparation_status_by_uid(&self, uid: &str, status: &str, error: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE preparation SET status = ?1, error = ?2, update_time = MAX(?3, create_time)
             WHERE uid = ?4",
            params![status, error, now_timestamp(), uid],
        )?;
        Ok(())
    }

    /// Sets the port unless one is already recorded. Returns whether it did.
    pub fn update_preparation_port_by_uid(&self, uid: &str, port: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE preparation SET port = ?1, update_time = MAX(?2, create_time)
             WHERE uid = ?3 AND (port IS NULL OR port = '')",
            params![port, now_timestamp(), uid],
        )?;
        Ok(changed > 0)
    }

    pub fn update_preparation_pid_by_uid(&self, uid: &str, pid: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE preparation SET pid = ?1, update_time = MAX(?2, create_time) WHERE uid = ?3",
            params![pid, now_timestamp(), uid],
        )?;
        Ok(())
    }

    pub fn query_preparations(&self, q: &PreparationQuery) -> Result<Vec<PreparationRecord>> {
        let mut filter = Where::default();
        filter.eq("program_type", &q.program_type);
        filter.status(&q.status);

        let sql = format!(
            "SELECT {COLUMNS} FROM preparation{}{}{}",
            filter.sql(),
            order(q.asc),
            Pagination::parse(&q.limit).sql()
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params.iter()), PreparationRecord::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
