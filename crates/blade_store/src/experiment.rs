use blade_spec::flags::{self, FlagMap};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::query::{order, Pagination, Where};
use crate::{now_timestamp, text, ExperimentQuery, Result, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: i64,
    pub uid: String,
    pub command: String,
    pub sub_command: String,
    pub flag: String,
    pub status: String,
    pub error: String,
    pub create_time: String,
    pub update_time: String,
}

const COLUMNS: &str =
    "id, uid, command, sub_command, flag, status, error, create_time, update_time";

impl ExperimentRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ExperimentRecord {
            id: row.get(0)?,
            uid: row.get(1)?,
            command: text(row, 2)?,
            sub_command: text(row, 3)?,
            flag: text(row, 4)?,
            status: text(row, 5)?,
            error: text(row, 6)?,
            create_time: text(row, 7)?,
            update_time: text(row, 8)?,
        })
    }

    /// True when every non-empty entry of `wanted` is present with the same
    /// value in this record's flags.
    pub fn matches_flags(&self, wanted: &FlagMap) -> bool {
        let mut wanted = wanted.iter().filter(|(_, v)| !v.is_empty()).peekable();
        if wanted.peek().is_none() {
            return true;
        }
        let Ok(recorded) = flags::parse(&self.flag) else {
            return false;
        };
        wanted.all(|(k, v)| recorded.get(k) == Some(v))
    }
}

impl Store {
    /// Inserts the record, filling `id` and any unset timestamps.
    pub fn insert_experiment(&self, record: &mut ExperimentRecord) -> Result<()> {
        if record.create_time.is_empty() {
            record.create_time = now_timestamp();
        }
        if record.update_time.is_empty() {
            record.update_time = record.create_time.clone();
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO experiment (uid, command, sub_command, flag, status, error, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.uid,
                record.command,
                record.sub_command,
                record.flag,
                record.status,
                record.error,
                record.create_time,
                record.update_time,
            ],
        )?;
        record.id = conn.last_insert_rowid();
        Ok(())
    }

    /// No-op when the uid is unknown.
    pub fn update_experiment_status_by_uid(&self, uid: &str, status: &str, error: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE experiment SET status = ?1, error = ?2, update_time = MAX(?3, create_time)
             WHERE uid = ?4",
            params![status, error, now_timestamp(), uid],
        )?;
        Ok(())
    }

    pub fn query_experiment_by_uid(&self, uid: &str) -> Result<Option<ExperimentRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM experiment WHERE uid = ?1"),
                params![uid],
                ExperimentRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn query_experiments(&self, q: &ExperimentQuery) -> Result<Vec<ExperimentRecord>> {
        let mut filter = Where::default();
        filter.eq("command", &q.target);
        filter.eq("sub_command", &q.action);
        filter.like("flag", &q.flag);
        filter.status(&q.status);

        let sql = format!(
            "SELECT {COLUMNS} FROM experiment{}{}{}",
            filter.sql(),
            order(q.asc),
            Pagination::parse(&q.limit).sql()
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params.iter()), ExperimentRecord::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Records stored under `command`/`sub_command` whose decoded flags agree
    /// with every non-empty entry of `flags`.
    pub fn query_experiments_by_command(
        &self,
        command: &str,
        sub_command: &str,
        flags: &FlagMap,
    ) -> Result<Vec<ExperimentRecord>> {
        let all = self.query_experiments(&ExperimentQuery {
            target: command.to_string(),
            action: sub_command.to_string(),
            asc: true,
            ..ExperimentQuery::default()
        })?;
        Ok(all.into_iter().filter(|r| r.matches_flags(flags)).collect())
    }

    /// No-op when the uid is unknown.
    pub fn delete_experiment_by_uid(&self, uid: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM experiment WHERE uid = ?1", params![uid])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uid: &str, command: &str, sub: &str, flag: &str) -> ExperimentRecord {
        ExperimentRecord {
            uid: uid.to_string(),
            command: command.to_string(),
            sub_command: sub.to_string(),
            flag: flag.to_string(),
            status: "Created".to_string(),
            ..ExperimentRecord::default()
        }
    }

    #[test]
    fn insert_fills_times_and_id() {
        let store = Store::open_in_memory().unwrap();
        let mut r = record("u1", "os", "load", "--cpu-percent=10");
        store.insert_experiment(&mut r).unwrap();
        assert!(r.id > 0);
        assert!(!r.create_time.is_empty());
        assert_eq!(r.create_time, r.update_time);

        let loaded = store.query_experiment_by_uid("u1").unwrap().unwrap();
        assert_eq!(loaded, r);
        assert!(store.query_experiment_by_uid("nope").unwrap().is_none());
    }

    #[test]
    fn duplicate_uid_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.insert_experiment(&mut record("dup", "os", "load", "")).unwrap();
        assert!(store.insert_experiment(&mut record("dup", "os", "load", "")).is_err());
    }

    #[test]
    fn update_keeps_update_time_after_create_time() {
        let store = Store::open_in_memory().unwrap();
        let mut r = record("u2", "os", "load", "");
        // A create time in the future must still bound the update time.
        r.create_time = "2999-01-01T00:00:00.000000000Z".to_string();
        store.insert_experiment(&mut r).unwrap();
        store.update_experiment_status_by_uid("u2", "Error", "boom").unwrap();
        let loaded = store.query_experiment_by_uid("u2").unwrap().unwrap();
        assert_eq!(loaded.status, "Error");
        assert_eq!(loaded.error, "boom");
        assert!(loaded.update_time >= loaded.create_time);

        store.update_experiment_status_by_uid("missing", "Error", "x").unwrap();
    }

    #[test]
    fn by_command_filters_on_decoded_flags() {
        let store = Store::open_in_memory().unwrap();
        store.insert_experiment(&mut record("a", "os", "load", "--cpu-percent=10")).unwrap();
        store.insert_experiment(&mut record("b", "os", "load", "--cpu-percent=20 --timeout=5")).unwrap();
        store.insert_experiment(&mut record("c", "os", "kill", "--cpu-percent=10")).unwrap();

        let mut wanted = FlagMap::new();
        assert_eq!(store.query_experiments_by_command("os", "load", &wanted).unwrap().len(), 2);

        wanted.insert("cpu-percent".into(), "20".into());
        wanted.insert("ignored".into(), String::new());
        let hits = store.query_experiments_by_command("os", "load", &wanted).unwrap();
        assert_eq!(hits.iter().map(|r| r.uid.as_str()).collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn delete_is_silent_for_missing_rows() {
        let store = Store::open_in_memory().unwrap();
        store.insert_experiment(&mut record("d", "os", "load", "")).unwrap();
        store.delete_experiment_by_uid("d").unwrap();
        store.delete_experiment_by_uid("d").unwrap();
        assert!(store.query_experiment_by_uid("d").unwrap().is_none());
    }
}
