//! Registry — the durable `slurm_job_id -> JobRecord` and
//! `task.uuid -> JobRecord` mapping. Wraps a `rusqlite::Connection` behind a
//! `Mutex` (connections are `Send` but not `Sync`).

mod schema;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};

use crate::catalog::{JobRecord, SlurmState, Task};
use crate::error::ProxyError;

pub struct Registry {
    conn: Mutex<Connection>,
}

impl Registry {
    pub fn open(path: &Path) -> Result<Self, ProxyError> {
        if !path.exists() {
            info!("Creating new registry database {}", path.display());
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Registry { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, ProxyError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Registry { conn: Mutex::new(conn) })
    }

    /// Invariant 1: reject before touching SLURM if either key already
    /// exists.
    pub fn contains_uuid(&self, task_uuid: &str) -> Result<bool, ProxyError> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE task_uuid = ?1)",
                params![task_uuid],
                |row| row.get(0),
            )
            .unwrap_or(false);
        Ok(exists)
    }

    pub fn contains_job_id(&self, slurm_job_id: i64) -> Result<bool, ProxyError> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE slurm_job_id = ?1)",
                params![slurm_job_id],
                |row| row.get(0),
            )
            .unwrap_or(false);
        Ok(exists)
    }

    /// Insert a freshly-submitted job. Guarded by the `(slurm_job_id,
    /// task.uuid)` uniqueness invariant — returns `ProxyError::Duplicate`
    /// if either key already exists, checked and inserted under the same
    /// lock so the check-then-insert is atomic with respect to concurrent
    /// submissions.
    pub fn upsert(&self, record: &JobRecord) -> Result<(), ProxyError> {
        let conn = self.conn.lock().unwrap();
        let uuid_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE task_uuid = ?1)",
                params![record.task.uuid],
                |row| row.get(0),
            )
            .unwrap_or(false);
        if uuid_exists {
            return Err(ProxyError::Duplicate(format!(
                "task uuid {} already registered",
                record.task.uuid
            )));
        }
        let job_id_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE slurm_job_id = ?1)",
                params![record.slurm_job_id],
                |row| row.get(0),
            )
            .unwrap_or(false);
        if job_id_exists {
            return Err(ProxyError::Duplicate(format!(
                "slurm job id {} already registered",
                record.slurm_job_id
            )));
        }

        let task_json = serde_json::to_string(&record.task)
            .map_err(|e| ProxyError::Persistence(format!("failed to serialise task: {e}")))?;
        conn.execute(
            "INSERT INTO jobs (slurm_job_id, task_uuid, slurm_username, slurm_job_state, task_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.slurm_job_id,
                record.task.uuid,
                record.slurm_username,
                record.slurm_job_state.as_str(),
                task_json,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_job_id(&self, slurm_job_id: i64) -> Result<Option<JobRecord>, ProxyError> {
        let conn = self.conn.lock().unwrap();
        row_by(&conn, "slurm_job_id = ?1", slurm_job_id)
    }

    pub fn find_by_uuid(&self, task_uuid: &str) -> Result<Option<JobRecord>, ProxyError> {
        let conn = self.conn.lock().unwrap();
        row_by(&conn, "task_uuid = ?1", task_uuid)
    }

    pub fn list_by_state(&self, state: SlurmState) -> Result<Vec<JobRecord>, ProxyError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT slurm_job_id, task_uuid, slurm_username, slurm_job_state, task_json, created_at, updated_at
             FROM jobs WHERE slurm_job_state = ?1",
        )?;
        let rows = stmt
            .query_map(params![state.as_str()], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| r.map_err(ProxyError::from)).collect()
    }

    /// Records whose `created_at` falls within `[min, max]` — the windowed
    /// scan the reconciliation loop uses to pick up stale jobs.
    pub fn scan(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> Result<Vec<JobRecord>, ProxyError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT slurm_job_id, task_uuid, slurm_username, slurm_job_state, task_json, created_at, updated_at
             FROM jobs WHERE created_at BETWEEN ?1 AND ?2",
        )?;
        let rows = stmt
            .query_map(params![min.to_rfc3339(), max.to_rfc3339()], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| r.map_err(ProxyError::from)).collect()
    }

    /// Update `slurm_job_state` (and `updated_at`). If the new state equals
    /// the currently stored state this is a benign no-op that still
    /// refreshes `updated_at`; if the row is missing entirely this is a
    /// hard `ProxyError::NotFound`.
    pub fn update_state(&self, slurm_job_id: i64, new_state: SlurmState) -> Result<(), ProxyError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE jobs SET slurm_job_state = ?1, updated_at = ?2 WHERE slurm_job_id = ?3",
            params![new_state.as_str(), now, slurm_job_id],
        )?;
        if changed == 0 {
            return Err(ProxyError::NotFound);
        }
        Ok(())
    }

    /// Remove a row and return what was deleted, or `None` if it wasn't
    /// present.
    pub fn delete(&self, slurm_job_id: i64) -> Result<Option<JobRecord>, ProxyError> {
        let conn = self.conn.lock().unwrap();
        let existing = row_by(&conn, "slurm_job_id = ?1", slurm_job_id)?;
        if existing.is_some() {
            conn.execute("DELETE FROM jobs WHERE slurm_job_id = ?1", params![slurm_job_id])?;
        }
        Ok(existing)
    }
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
    let slurm_job_id: i64 = row.get(0)?;
    let slurm_username: String = row.get(2)?;
    let state_str: String = row.get(3)?;
    let task_json: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    let task: Task = serde_json::from_str(&task_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(JobRecord {
        slurm_job_id,
        slurm_username,
        slurm_job_state: SlurmState::normalise(&state_str),
        task,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_by<T: rusqlite::ToSql>(
    conn: &Connection,
    clause: &str,
    value: T,
) -> Result<Option<JobRecord>, ProxyError> {
    let sql = format!(
        "SELECT slurm_job_id, task_uuid, slurm_username, slurm_job_state, task_json, created_at, updated_at
         FROM jobs WHERE {clause}"
    );
    let record = conn
        .query_row(&sql, params![value], map_row)
        .optional()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{TaskDirs, TaskSlurm};

    fn sample_record(job_id: i64, uuid: &str, state: SlurmState) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            slurm_job_id: job_id,
            slurm_username: "alice".to_string(),
            slurm_job_state: state,
            task: Task {
                uuid: uuid.to_string(),
                username: "alice".to_string(),
                name: "echo_hello_world".to_string(),
                cmd: None,
                params: vec![],
                cwd: "/h/a".to_string(),
                dirs: TaskDirs {
                    parent: "/h/a/p".to_string(),
                    input: "/h/a/i".to_string(),
                    output: "/h/a/o".to_string(),
                    error: "/h/a/e".to_string(),
                },
                slurm: TaskSlurm {
                    partition: "q".to_string(),
                    cpus_per_task: 1,
                    mem: 100,
                    time: 60,
                    nodes: 1,
                    ntasks_per_node: 1,
                    output: "o.txt".to_string(),
                    error: "e.txt".to_string(),
                    job_name: "j".to_string(),
                    environment: None,
                },
                notification: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn upsert_then_find_round_trips() {
        let reg = Registry::open_in_memory().unwrap();
        let record = sample_record(1002, "u1", SlurmState::Unknown);
        reg.upsert(&record).unwrap();

        let found = reg.find_by_uuid("u1").unwrap().unwrap();
        assert_eq!(found.slurm_job_id, 1002);
        assert_eq!(found.task.uuid, "u1");
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let reg = Registry::open_in_memory().unwrap();
        let record = sample_record(1002, "u1", SlurmState::Unknown);
        reg.upsert(&record).unwrap();

        let dup = sample_record(1003, "u1", SlurmState::Unknown);
        let err = reg.upsert(&dup).unwrap_err();
        assert!(matches!(err, ProxyError::Duplicate(_)));
    }

    #[test]
    fn duplicate_job_id_is_rejected() {
        let reg = Registry::open_in_memory().unwrap();
        let record = sample_record(1002, "u1", SlurmState::Unknown);
        reg.upsert(&record).unwrap();

        let dup = sample_record(1002, "u2", SlurmState::Unknown);
        let err = reg.upsert(&dup).unwrap_err();
        assert!(matches!(err, ProxyError::Duplicate(_)));
    }

    #[test]
    fn update_state_same_value_is_benign_noop() {
        let reg = Registry::open_in_memory().unwrap();
        let record = sample_record(1002, "u1", SlurmState::Running);
        reg.upsert(&record).unwrap();

        reg.update_state(1002, SlurmState::Running).unwrap();
        let found = reg.find_by_job_id(1002).unwrap().unwrap();
        assert_eq!(found.slurm_job_state, SlurmState::Running);
    }

    #[test]
    fn update_state_missing_job_is_not_found() {
        let reg = Registry::open_in_memory().unwrap();
        let err = reg.update_state(9999, SlurmState::Completed).unwrap_err();
        assert!(matches!(err, ProxyError::NotFound));
    }

    #[test]
    fn delete_removes_and_returns_record() {
        let reg = Registry::open_in_memory().unwrap();
        let record = sample_record(1002, "u1", SlurmState::Completed);
        reg.upsert(&record).unwrap();

        let deleted = reg.delete(1002).unwrap().unwrap();
        assert_eq!(deleted.slurm_job_id, 1002);
        assert!(reg.find_by_job_id(1002).unwrap().is_none());

        assert!(reg.delete(1002).unwrap().is_none());
    }

    #[test]
    fn scan_window_excludes_old_records() {
        let reg = Registry::open_in_memory().unwrap();
        let mut old = sample_record(1, "old", SlurmState::Running);
        old.created_at = Utc::now() - chrono::Duration::days(10);
        reg.upsert(&old).unwrap();
        // manually backdate created_at since upsert always uses record.created_at
        {
            let conn = reg.conn.lock().unwrap();
            conn.execute(
                "UPDATE jobs SET created_at = ?1 WHERE slurm_job_id = 1",
                params![(Utc::now() - chrono::Duration::days(10)).to_rfc3339()],
            )
            .unwrap();
        }
        let recent = sample_record(2, "new", SlurmState::Running);
        reg.upsert(&recent).unwrap();

        let window = reg
            .scan(Utc::now() - chrono::Duration::hours(1), Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].slurm_job_id, 2);
    }

    #[test]
    fn open_creates_db_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        assert!(!path.exists());
        let reg = Registry::open(&path).unwrap();
        assert!(path.exists());
        reg.upsert(&sample_record(1, "u1", SlurmState::Unknown)).unwrap();
    }
}
