// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable job store backed by SQLite.
//
// One row per submitted job holds the immutable PrintJob and its mutable
// JobRecord, both as JSON.  Rows survive process restarts so unfinished
// jobs can be picked up again.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::{JobId, JobRecord, PrintJob};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        tag TEXT NOT NULL,
        state TEXT NOT NULL,
        job TEXT NOT NULL,
        record TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

const SELECT_COLUMNS: &str = "SELECT job, record, created_at FROM jobs";

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> BonwerkError + '_ {
    move |e| BonwerkError::Database(format!("{context}: {e}"))
}

/// A stored job: the work itself and how far it got.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub job: PrintJob,
    pub record: JobRecord,
}

/// Synchronous SQLite store.  Calls are short; callers hold it behind a
/// mutex.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (or create) the store at `path`, in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;
        info!("job store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;
        debug!("in-memory job store opened");
        Ok(Self { conn })
    }

    /// Store a newly submitted job.  Returns `false` if a row with the same
    /// id already exists; the existing row is left untouched.
    #[instrument(skip(self, job, record), fields(job_id = %job.id()))]
    pub fn insert(&self, job: &PrintJob, record: &JobRecord) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO jobs (id, tag, state, job, record, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job.id().as_str(),
                    job.tag(),
                    record.state.as_str(),
                    serde_json::to_string(job)?,
                    serde_json::to_string(record)?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err("insert job"))?;
        Ok(rows == 1)
    }

    /// Overwrite the record of an existing job.
    #[instrument(skip(self, record), fields(job_id = %record.job_id, state = %record.state))]
    pub fn save_record(&self, record: &JobRecord) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, record = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    record.state.as_str(),
                    serde_json::to_string(record)?,
                    record.updated_at.to_rfc3339(),
                    record.job_id.as_str(),
                ],
            )
            .map_err(db_err("update record"))?;
        if rows == 0 {
            return Err(BonwerkError::JobNotFound(record.job_id.to_string()));
        }
        Ok(())
    }

    pub fn get(&self, id: &JobId) -> Result<Option<StoredJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .map_err(db_err("prepare get"))?;
        let mut rows = stmt
            .query_map(params![id.as_str()], row_to_stored)
            .map_err(db_err("query get"))?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(db_err("row parse"))?)),
            None => Ok(None),
        }
    }

    /// Every stored job, newest first.
    pub fn all(&self) -> Result<Vec<StoredJob>> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC"))
    }

    /// Jobs a restarted process has to pick up again, oldest first:
    /// enqueued, blocked, interrupted mid-run, or waiting for a retry.
    pub fn unfinished(&self) -> Result<Vec<StoredJob>> {
        let jobs = self.query(&format!(
            "{SELECT_COLUMNS} WHERE state IN ('ENQUEUED', 'BLOCKED', 'RUNNING', 'FAILED')
             ORDER BY created_at ASC"
        ))?;
        Ok(jobs
            .into_iter()
            .filter(|stored| !stored.record.is_finished())
            .collect())
    }

    /// Remove every finished job.  Returns the ids removed.
    #[instrument(skip(self))]
    pub fn prune_finished(&mut self) -> Result<Vec<JobId>> {
        let finished: Vec<JobId> = self
            .all()?
            .into_iter()
            .filter(|stored| stored.record.is_finished())
            .map(|stored| stored.record.job_id)
            .collect();

        let tx = self.conn.transaction().map_err(db_err("begin prune"))?;
        for id in &finished {
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![id.as_str()])
                .map_err(db_err("prune job"))?;
        }
        tx.commit().map_err(db_err("commit prune"))?;

        info!(count = finished.len(), "finished jobs pruned");
        Ok(finished)
    }

    fn query(&self, sql: &str) -> Result<Vec<StoredJob>> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err("prepare query"))?;
        let rows = stmt
            .query_map([], row_to_stored)
            .map_err(db_err("run query"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect rows"))?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Column order: job, record, created_at.
fn row_to_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredJob> {
    let job: PrintJob = json_column(row, 0)?;
    let mut record: JobRecord = json_column(row, 1)?;

    // The column is authoritative for ordering; keep the record in step.
    let created_at: String = row.get(2)?;
    record.created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(StoredJob { job, record })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bonwerk_core::{DeviceAddress, JobState, PrinterProfile};

    fn test_job(id: &str) -> PrintJob {
        let profile = PrinterProfile::new(DeviceAddress::network("10.0.0.5", 9100)).unwrap();
        PrintJob::builder(profile)
            .id(id)
            .initialize_printer()
            .print_line("A")
            .cut_paper()
            .build()
    }

    fn store_with(ids: &[&str]) -> JobStore {
        let store = JobStore::open_in_memory().expect("open in-memory db");
        for id in ids {
            let job = test_job(id);
            assert!(store.insert(&job, &JobRecord::new(&job)).unwrap());
        }
        store
    }

    #[test]
    fn insert_and_retrieve_job() {
        let store = store_with(&["a"]);
        let stored = store.get(&JobId::from("a")).unwrap().expect("found");
        assert_eq!(stored.job, test_job("a"));
        assert_eq!(stored.record.state, JobState::Enqueued);
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let store = store_with(&["a"]);
        let mut record = store.get(&JobId::from("a")).unwrap().unwrap().record;
        record.transition(JobState::Running).unwrap();
        store.save_record(&record).unwrap();

        let again = test_job("a");
        assert!(!store.insert(&again, &JobRecord::new(&again)).unwrap());
        let kept = store.get(&JobId::from("a")).unwrap().unwrap();
        assert_eq!(kept.record.state, JobState::Running);
    }

    #[test]
    fn save_record_of_unknown_job_fails() {
        let store = store_with(&[]);
        let record = JobRecord::new(&test_job("ghost"));
        assert!(matches!(
            store.save_record(&record),
            Err(BonwerkError::JobNotFound(_))
        ));
    }

    #[test]
    fn unfinished_skips_completed_and_terminal_failures() {
        let mut store = store_with(&["done", "waiting", "gave-up", "retrying"]);

        let mut done = store.get(&"done".into()).unwrap().unwrap().record;
        done.transition(JobState::Running).unwrap();
        done.transition(JobState::Succeeded).unwrap();
        store.save_record(&done).unwrap();

        let err = BonwerkError::unreachable("10.0.0.5:9100", "refused");
        let mut gave_up = store.get(&"gave-up".into()).unwrap().unwrap().record;
        gave_up.transition(JobState::Running).unwrap();
        gave_up.fail(&err).unwrap();
        store.save_record(&gave_up).unwrap();

        let mut retrying = store.get(&"retrying".into()).unwrap().unwrap().record;
        retrying.transition(JobState::Running).unwrap();
        retrying.fail(&err).unwrap();
        retrying.next_attempt_at = Some(Utc::now());
        store.save_record(&retrying).unwrap();

        let ids: Vec<_> = store
            .unfinished()
            .unwrap()
            .into_iter()
            .map(|s| s.record.job_id.to_string())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"waiting".to_owned()));
        assert!(ids.contains(&"retrying".to_owned()));

        let pruned = store.prune_finished().unwrap();
        assert_eq!(pruned.len(), 2);
        assert_eq!(store.all().unwrap().len(), 2);
    }

    #[test]
    fn jobs_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        {
            let store = JobStore::open(&path).unwrap();
            let job = test_job("persisted");
            store.insert(&job, &JobRecord::new(&job)).unwrap();
        }
        let store = JobStore::open(&path).unwrap();
        let unfinished = store.unfinished().unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].job.operations().len(), 3);
    }
}
