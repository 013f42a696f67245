//! Durable job store backed by SQLite.
//!
//! All reads and writes go through one shared connection behind a mutex —
//! the single-writer boundary for the whole scheduler. Every successful
//! mutation is committed before the call returns, so a crash immediately
//! afterwards never loses it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::{Job, JobMode, JobPatch, JobStatus, Schedule};

const JOB_COLUMNS: &str = "id, name, mode, message, schedule, status, next_fire_at, \
                           last_fired_at, run_count, last_error, created_at, updated_at";

/// How many characters of the message become the job's display name.
const NAME_LEN: usize = 30;

/// Shared handle to the persistent job table.
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persist a new job and return the full record.
    ///
    /// Enforces the mode/schedule pairing invariant: `one_time` jobs carry
    /// `Once`, recurring modes carry `Interval` or `Calendar`.
    pub fn create(
        &self,
        mode: JobMode,
        message: &str,
        schedule: Schedule,
        next_fire_at: DateTime<Utc>,
    ) -> Result<Job> {
        let once = matches!(schedule, Schedule::Once { .. });
        if (mode == JobMode::OneTime) != once {
            return Err(SchedulerError::InvalidSchedule(format!(
                "mode '{mode}' cannot carry a {} schedule",
                if once { "one-shot" } else { "recurring" },
            )));
        }

        let now = Utc::now();
        // UUID v7 is time-ordered: id order is creation order, which makes
        // simultaneous-due dispatch deterministic.
        let id = Uuid::now_v7().to_string();
        let name: String = message.chars().take(NAME_LEN).collect();
        let schedule_json = serde_json::to_string(&schedule)
            .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs
             (id, name, mode, message, schedule, status, next_fire_at,
              last_fired_at, run_count, last_error, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,'scheduled',?6,NULL,0,NULL,?7,?7)",
            rusqlite::params![
                id,
                name,
                mode.to_string(),
                message,
                schedule_json,
                ts(next_fire_at),
                ts(now),
            ],
        )?;

        Ok(Job {
            id,
            name,
            mode,
            message: message.to_string(),
            schedule,
            status: JobStatus::Scheduled,
            next_fire_at: Some(next_fire_at),
            last_fired_at: None,
            run_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Load one job by ID.
    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(row_to_job(row)),
            None => Ok(None),
        }
    }

    /// Return all jobs in creation order (listing view, audit included).
    pub fn list(&self) -> Result<Vec<Job>> {
        self.query_jobs("SELECT {cols} FROM jobs ORDER BY created_at, id", [])
    }

    /// Return scheduled jobs whose fire time has arrived, soonest first,
    /// ties broken by id (creation) order.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        self.query_jobs(
            "SELECT {cols} FROM jobs
             WHERE status = 'scheduled' AND next_fire_at IS NOT NULL AND next_fire_at <= ?1
             ORDER BY next_fire_at, created_at, id",
            [ts(now)],
        )
    }

    /// Earliest fire time among scheduled jobs, if any.
    pub fn soonest(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT MIN(next_fire_at) FROM jobs
             WHERE status = 'scheduled' AND next_fire_at IS NOT NULL",
        )?;
        let min: Option<String> = stmt.query_row([], |row| row.get(0))?;
        Ok(min.and_then(|s| parse_ts(&s)))
    }

    /// Apply a partial update atomically.
    ///
    /// Fails with `JobNotFound` when the id is absent or the job is already
    /// removed — terminal records never mutate.
    pub fn update(&self, id: &str, patch: JobPatch) -> Result<()> {
        let mut sets: Vec<String> = vec!["updated_at = ?1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(ts(Utc::now()))];

        if let Some(status) = patch.status {
            params.push(Box::new(status.to_string()));
            sets.push(format!("status = ?{}", params.len()));
        }
        if let Some(next) = patch.next_fire_at {
            params.push(Box::new(next.map(ts)));
            sets.push(format!("next_fire_at = ?{}", params.len()));
        }
        if let Some(fired) = patch.last_fired_at {
            params.push(Box::new(ts(fired)));
            sets.push(format!("last_fired_at = ?{}", params.len()));
        }
        if let Some(error) = patch.last_error {
            params.push(Box::new(error));
            sets.push(format!("last_error = ?{}", params.len()));
        }
        if patch.bump_run_count {
            sets.push("run_count = run_count + 1".to_string());
        }

        params.push(Box::new(id.to_string()));
        let sql = format!(
            "UPDATE jobs SET {} WHERE id = ?{} AND status != 'removed'",
            sets.join(", "),
            params.len(),
        );

        let conn = self.conn.lock().unwrap();
        let n = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Mark a job removed, keeping the record for audit.
    ///
    /// Removing an already-removed job succeeds (idempotent); an unknown id
    /// is `JobNotFound`.
    pub fn remove(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs SET status = 'removed', next_fire_at = NULL, updated_at = ?1
             WHERE id = ?2 AND status != 'removed'",
            rusqlite::params![ts(Utc::now()), id],
        )?;
        if n == 0 {
            // Distinguish "already removed" (fine) from "never existed".
            let exists: bool = conn
                .prepare_cached("SELECT 1 FROM jobs WHERE id = ?1")?
                .exists([id])?;
            if !exists {
                return Err(SchedulerError::JobNotFound { id: id.to_string() });
            }
        }
        Ok(())
    }

    fn query_jobs<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&sql.replace("{cols}", JOB_COLUMNS))?;
        let mut rows = stmt.query(params)?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(job) = row_to_job(row) {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

/// Uniform timestamp encoding: fixed-width RFC 3339 so SQL string
/// comparison orders chronologically.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode one row; corrupt rows are logged and skipped rather than
/// poisoning every query that touches the table.
fn row_to_job(row: &rusqlite::Row<'_>) -> Option<Job> {
    let id: String = row.get(0).ok()?;
    let decode = || -> Option<Job> {
        let schedule_json: String = row.get(4).ok()?;
        let mode_str: String = row.get(2).ok()?;
        let status_str: String = row.get(5).ok()?;
        Some(Job {
            id: id.clone(),
            name: row.get(1).ok()?,
            mode: mode_str.parse().ok()?,
            message: row.get(3).ok()?,
            schedule: serde_json::from_str(&schedule_json).ok()?,
            status: status_str.parse().ok()?,
            next_fire_at: row
                .get::<_, Option<String>>(6)
                .ok()?
                .and_then(|s| parse_ts(&s)),
            last_fired_at: row
                .get::<_, Option<String>>(7)
                .ok()?
                .and_then(|s| parse_ts(&s)),
            run_count: row.get(8).ok()?,
            last_error: row.get(9).ok()?,
            created_at: parse_ts(&row.get::<_, String>(10).ok()?)?,
            updated_at: parse_ts(&row.get::<_, String>(11).ok()?)?,
        })
    };
    let job = decode();
    if job.is_none() {
        warn!(job_id = %id, "skipping corrupt job row");
    }
    job
}
