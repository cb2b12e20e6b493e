//! SQLite-backed job, metrics and config store.
//!
//! All four tables (`jobs`, `job_executions`, `metrics`, `config`) live in one
//! database file. Timestamps are stored as integer microseconds since the Unix
//! epoch so ordering and lease arithmetic stay in SQL.
//!
//! ## Claiming
//!
//! `claim_next` reads the oldest eligible row, then issues a single
//! `UPDATE ... WHERE id = ? AND state = ? AND locked_at IS ?` guarded on the
//! values it observed. A concurrent claimer that already moved the row makes
//! the update match zero rows, and the loser gets `None`. No transaction or
//! in-process lock is involved, so separate processes sharing the file are
//! coordinated the same way.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | Database (unique violation on insert) | `DuplicateId` |
//! | Database (other) | `Storage` |
//! | PoolClosed / other | `Storage` |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use queuectl_core::{
    ExecutionRecord, ExecutionSummary, Job, JobId, JobState, Metric, NewJob, StateCounts, WorkerId,
    LEASE_WINDOW,
};

use super::store::{JobStore, JobStoreError};
use crate::config::{ConfigEntry, ConfigStore};
use crate::metrics::MetricsRecorder;

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "jobs.db";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id              TEXT PRIMARY KEY,
        command         TEXT NOT NULL,
        state           TEXT NOT NULL,
        attempts        INTEGER NOT NULL DEFAULT 0,
        max_retries     INTEGER NOT NULL,
        timeout_seconds INTEGER,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL,
        last_error      TEXT NOT NULL DEFAULT '',
        next_retry_at   INTEGER,
        locked_by       TEXT,
        locked_at       INTEGER,
        output          TEXT NOT NULL DEFAULT ''
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_state_created ON jobs(state, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS job_executions (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id       TEXT NOT NULL,
        started_at   INTEGER NOT NULL,
        completed_at INTEGER NOT NULL,
        duration_ms  INTEGER NOT NULL,
        success      INTEGER NOT NULL,
        timeout      INTEGER NOT NULL,
        error        TEXT NOT NULL DEFAULT ''
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_job_executions_started ON job_executions(started_at)",
    "CREATE INDEX IF NOT EXISTS idx_job_executions_job ON job_executions(job_id)",
    r#"
    CREATE TABLE IF NOT EXISTS metrics (
        key        TEXT PRIMARY KEY,
        value      INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
];

macro_rules! job_columns {
    () => {
        "id, command, state, attempts, max_retries, timeout_seconds, created_at, updated_at, \
         last_error, next_retry_at, locked_by, locked_at, output"
    };
}

/// SQLite job store.
///
/// `Send + Sync` and cheap to clone; all state lives in the connection pool.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    lease: Duration,
}

impl SqliteJobStore {
    /// Open (creating if needed) the database at `path` in WAL mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, JobStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("open", e))?;

        Self::new(pool).await
    }

    /// Open a private in-memory database.
    ///
    /// The pool is pinned to one long-lived connection; every new connection
    /// to `sqlite::memory:` would otherwise see an empty database.
    pub async fn open_in_memory() -> Result<Self, JobStoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("open_in_memory", e))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("open_in_memory", e))?;

        Self::new(pool).await
    }

    /// Wrap an existing pool and ensure the schema exists.
    pub async fn new(pool: SqlitePool) -> Result<Self, JobStoreError> {
        let store = Self {
            pool,
            lease: LEASE_WINDOW,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Override the claim lease window.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }
        Ok(())
    }

    async fn fetch_jobs(
        &self,
        operation: &str,
        state: Option<JobState>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            job_columns!(),
            " FROM jobs WHERE (?1 IS NULL OR state = ?1) ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        rows.iter().map(job_from_row).collect()
    }

    fn lease_micros(&self) -> i64 {
        i64::try_from(self.lease.as_micros()).unwrap_or(i64::MAX)
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn create(&self, job: NewJob) -> Result<Job, JobStoreError> {
        let job = Job::from_new(job, now_truncated());

        let result = sqlx::query(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, timeout_seconds, \
             created_at, updated_at, last_error, output) \
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?6, '', '')",
        )
        .bind(job.id.as_str())
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(i64::from(job.max_retries))
        .bind(job.timeout_seconds.map(i64::from))
        .bind(to_micros(job.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(JobStoreError::DuplicateId(job.id))
            }
            Err(e) => Err(map_sqlx_error("create", e)),
        }
    }

    #[instrument(skip(self), fields(worker = %worker), err)]
    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Job>, JobStoreError> {
        let now = to_micros(Utc::now());
        let lease_cutoff = now.saturating_sub(self.lease_micros());

        let candidate = sqlx::query(
            "SELECT id, state, locked_at FROM jobs \
             WHERE (state = 'pending' \
                    AND (locked_by IS NULL OR locked_at IS NULL OR locked_at < ?1) \
                    AND (next_retry_at IS NULL OR next_retry_at <= ?2)) \
                OR (state = 'processing' AND (locked_at IS NULL OR locked_at < ?1)) \
             ORDER BY created_at ASC, rowid ASC \
             LIMIT 1",
        )
        .bind(lease_cutoff)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next.select", e))?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let id: String = candidate
            .try_get("id")
            .map_err(|e| map_sqlx_error("claim_next.decode", e))?;
        let observed_state: String = candidate
            .try_get("state")
            .map_err(|e| map_sqlx_error("claim_next.decode", e))?;
        let observed_locked_at: Option<i64> = candidate
            .try_get("locked_at")
            .map_err(|e| map_sqlx_error("claim_next.decode", e))?;

        // Guarded on what was read; a concurrent winner leaves zero rows to update.
        let claimed = sqlx::query(concat!(
            "UPDATE jobs SET state = 'processing', locked_by = ?1, locked_at = ?2, \
             next_retry_at = NULL, updated_at = ?2 \
             WHERE id = ?3 AND state = ?4 AND locked_at IS ?5 \
             RETURNING ",
            job_columns!()
        ))
        .bind(worker.as_str())
        .bind(now)
        .bind(&id)
        .bind(&observed_state)
        .bind(observed_locked_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next.update", e))?;

        claimed.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, last_error), fields(job_id = %job_id, state = %state), err)]
    async fn transition(
        &self,
        job_id: &JobId,
        state: JobState,
        last_error: &str,
    ) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?1, last_error = ?2, updated_at = ?3, \
             locked_by = NULL, locked_at = NULL, \
             next_retry_at = CASE WHEN ?1 = 'pending' THEN next_retry_at ELSE NULL END \
             WHERE id = ?4",
        )
        .bind(state.as_str())
        .bind(last_error)
        .bind(to_micros(Utc::now()))
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition", e))?;

        ensure_found(result.rows_affected(), job_id)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn increment_attempts(&self, job_id: &JobId) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET attempts = attempts + 1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(to_micros(Utc::now()))
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment_attempts", e))?;

        ensure_found(result.rows_affected(), job_id)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn set_next_retry_at(
        &self,
        job_id: &JobId,
        when: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        let result = sqlx::query("UPDATE jobs SET next_retry_at = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(to_micros(when))
            .bind(to_micros(Utc::now()))
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_next_retry_at", e))?;

        ensure_found(result.rows_affected(), job_id)
    }

    #[instrument(skip(self, output), fields(job_id = %job_id, bytes = output.len()), err)]
    async fn save_output(&self, job_id: &JobId, output: &str) -> Result<(), JobStoreError> {
        let result = sqlx::query("UPDATE jobs SET output = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(output)
            .bind(to_micros(Utc::now()))
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("save_output", e))?;

        ensure_found(result.rows_affected(), job_id)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: &JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(concat!("SELECT ", job_columns!(), " FROM jobs WHERE id = ?1"))
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Job>, JobStoreError> {
        self.fetch_jobs("list_all", None).await
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, JobStoreError> {
        self.fetch_jobs("list_by_state", Some(state)).await
    }

    #[instrument(skip(self), err)]
    async fn counts_by_state(&self) -> Result<StateCounts, JobStoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("counts_by_state", e))?;

        let mut counts = StateCounts::default();
        for (state, count) in rows {
            let state = JobState::from_str(&state)
                .map_err(|e| JobStoreError::storage(format!("counts_by_state: {e}")))?;
            counts.add(state, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn retry_dead(&self, job_id: &JobId) -> Result<Job, JobStoreError> {
        let row = sqlx::query(concat!(
            "UPDATE jobs SET state = 'pending', attempts = 0, locked_by = NULL, locked_at = NULL, \
             next_retry_at = NULL, updated_at = ?1 \
             WHERE id = ?2 AND state = 'dead' \
             RETURNING ",
            job_columns!()
        ))
        .bind(to_micros(Utc::now()))
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("retry_dead", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => match self.get(job_id).await? {
                Some(_) => Err(JobStoreError::NotDead(job_id.clone())),
                None => Err(JobStoreError::NotFound(job_id.clone())),
            },
        }
    }
}

#[async_trait::async_trait]
impl MetricsRecorder for SqliteJobStore {
    #[instrument(skip(self), fields(metric = %metric), err)]
    async fn increment(&self, metric: Metric) -> Result<(), JobStoreError> {
        sqlx::query(
            "INSERT INTO metrics (key, value, updated_at) VALUES (?1, 1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = value + 1, updated_at = ?2",
        )
        .bind(metric.key())
        .bind(to_micros(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment", e))?;
        Ok(())
    }

    async fn counter(&self, metric: Metric) -> Result<i64, JobStoreError> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM metrics WHERE key = ?1")
            .bind(metric.key())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("counter", e))?;
        Ok(value.unwrap_or(0))
    }

    #[instrument(skip(self, record), fields(job_id = %record.job_id), err)]
    async fn record_execution(&self, record: &ExecutionRecord) -> Result<(), JobStoreError> {
        sqlx::query(
            "INSERT INTO job_executions \
             (job_id, started_at, completed_at, duration_ms, success, timeout, error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(record.job_id.as_str())
        .bind(to_micros(record.started_at))
        .bind(to_micros(record.completed_at))
        .bind(record.duration_ms)
        .bind(record.success)
        .bind(record.timed_out)
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_execution", e))?;
        Ok(())
    }

    async fn executions_for(&self, job_id: &JobId) -> Result<Vec<ExecutionRecord>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT job_id, started_at, completed_at, duration_ms, success, timeout, error \
             FROM job_executions WHERE job_id = ?1 ORDER BY id ASC",
        )
        .bind(job_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("executions_for", e))?;

        rows.iter()
            .map(|row| {
                let job_id: String = row.try_get("job_id").map_err(decode_err)?;
                Ok(ExecutionRecord {
                    job_id: parse_job_id(job_id)?,
                    started_at: from_micros(row.try_get("started_at").map_err(decode_err)?)?,
                    completed_at: from_micros(row.try_get("completed_at").map_err(decode_err)?)?,
                    duration_ms: row.try_get("duration_ms").map_err(decode_err)?,
                    success: row.try_get("success").map_err(decode_err)?,
                    timed_out: row.try_get("timeout").map_err(decode_err)?,
                    error: row.try_get("error").map_err(decode_err)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionSummary>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT e.job_id, j.command, j.state, e.started_at, e.completed_at, \
                    e.duration_ms, e.success, e.timeout, e.error \
             FROM job_executions e \
             JOIN jobs j ON e.job_id = j.id \
             ORDER BY e.started_at DESC, e.id DESC \
             LIMIT ?1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("recent_executions", e))?;

        rows.iter()
            .map(|row| {
                let job_id: String = row.try_get("job_id").map_err(decode_err)?;
                let state: String = row.try_get("state").map_err(decode_err)?;
                Ok(ExecutionSummary {
                    job_id: parse_job_id(job_id)?,
                    command: row.try_get("command").map_err(decode_err)?,
                    state: parse_state(&state)?,
                    started_at: from_micros(row.try_get("started_at").map_err(decode_err)?)?,
                    completed_at: from_micros(row.try_get("completed_at").map_err(decode_err)?)?,
                    duration_ms: row.try_get("duration_ms").map_err(decode_err)?,
                    success: row.try_get("success").map_err(decode_err)?,
                    timeout: row.try_get("timeout").map_err(decode_err)?,
                    error: row.try_get("error").map_err(decode_err)?,
                })
            })
            .collect()
    }

    async fn duration_summary(&self, since: DateTime<Utc>) -> Result<(i64, f64), JobStoreError> {
        let (count, avg): (i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*), AVG(duration_ms) FROM job_executions WHERE started_at > ?1",
        )
        .bind(to_micros(since))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("duration_summary", e))?;

        Ok((count, avg.unwrap_or(0.0)))
    }
}

#[async_trait::async_trait]
impl ConfigStore for SqliteJobStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>, JobStoreError> {
        sqlx::query_scalar("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_config", e))
    }

    #[instrument(skip(self, value), err)]
    async fn set_config(&self, key: &str, value: &str) -> Result<(), JobStoreError> {
        sqlx::query(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(to_micros(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_config", e))?;
        Ok(())
    }

    async fn list_config(&self) -> Result<Vec<ConfigEntry>, JobStoreError> {
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT key, value, updated_at FROM config ORDER BY key")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("list_config", e))?;

        rows.into_iter()
            .map(|(key, value, updated_at)| {
                Ok(ConfigEntry {
                    key,
                    value,
                    updated_at: from_micros(updated_at)?,
                })
            })
            .collect()
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job, JobStoreError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let state: String = row.try_get("state").map_err(decode_err)?;
    let attempts: i64 = row.try_get("attempts").map_err(decode_err)?;
    let max_retries: i64 = row.try_get("max_retries").map_err(decode_err)?;
    let timeout_seconds: Option<i64> = row.try_get("timeout_seconds").map_err(decode_err)?;
    let next_retry_at: Option<i64> = row.try_get("next_retry_at").map_err(decode_err)?;
    let locked_by: Option<String> = row.try_get("locked_by").map_err(decode_err)?;
    let locked_at: Option<i64> = row.try_get("locked_at").map_err(decode_err)?;

    Ok(Job {
        id: parse_job_id(id)?,
        command: row.try_get("command").map_err(decode_err)?,
        state: parse_state(&state)?,
        attempts: to_u32("attempts", attempts)?,
        max_retries: to_u32("max_retries", max_retries)?,
        timeout_seconds: timeout_seconds
            .map(|t| to_u32("timeout_seconds", t))
            .transpose()?,
        created_at: from_micros(row.try_get("created_at").map_err(decode_err)?)?,
        updated_at: from_micros(row.try_get("updated_at").map_err(decode_err)?)?,
        last_error: row.try_get("last_error").map_err(decode_err)?,
        next_retry_at: next_retry_at.map(from_micros).transpose()?,
        locked_by: locked_by.map(|w| WorkerId::from(w.as_str())),
        locked_at: locked_at.map(from_micros).transpose()?,
        output: row.try_get("output").map_err(decode_err)?,
    })
}

fn ensure_found(rows_affected: u64, job_id: &JobId) -> Result<(), JobStoreError> {
    if rows_affected == 0 {
        Err(JobStoreError::NotFound(job_id.clone()))
    } else {
        Ok(())
    }
}

fn parse_job_id(raw: String) -> Result<JobId, JobStoreError> {
    JobId::new(raw).map_err(|e| JobStoreError::storage(format!("corrupt job id: {e}")))
}

fn parse_state(raw: &str) -> Result<JobState, JobStoreError> {
    JobState::from_str(raw).map_err(|e| JobStoreError::storage(format!("corrupt job state: {e}")))
}

fn to_u32(column: &str, value: i64) -> Result<u32, JobStoreError> {
    u32::try_from(value)
        .map_err(|_| JobStoreError::storage(format!("column {column} out of range: {value}")))
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, JobStoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| JobStoreError::storage(format!("timestamp out of range: {micros}")))
}

/// `Utc::now()` at the precision the database keeps.
fn now_truncated() -> DateTime<Utc> {
    let now = Utc::now();
    from_micros(to_micros(now)).unwrap_or(now)
}

fn decode_err(err: sqlx::Error) -> JobStoreError {
    map_sqlx_error("decode_row", err)
}

/// Map SQLx errors to `JobStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            JobStoreError::Storage(format!("unexpected row not found in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(id: &str, command: &str) -> NewJob {
        NewJob {
            id: JobId::new(id).unwrap(),
            command: command.to_string(),
            max_retries: 3,
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn create_get_round_trip() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        let created = store.create(new_job("a", "echo hi")).await.unwrap();

        let loaded = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.state, JobState::Pending);
        assert_eq!(loaded.attempts, 0);
        assert!(store.get(&JobId::new("nope").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_without_side_effects() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        store.create(new_job("a", "echo hi")).await.unwrap();

        let err = store.create(new_job("a", "echo other")).await.unwrap_err();
        assert_eq!(err, JobStoreError::DuplicateId(JobId::new("a").unwrap()));

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].command, "echo hi");
    }

    #[tokio::test]
    async fn claim_stamps_lock_and_respects_fifo() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        store.create(new_job("first", "true")).await.unwrap();
        store.create(new_job("second", "true")).await.unwrap();

        let worker = WorkerId::numbered(1);
        let job = store.claim_next(&worker).await.unwrap().unwrap();
        assert_eq!(job.id.as_str(), "first");
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.locked_by, Some(worker.clone()));
        assert!(job.locked_at.is_some());

        let job = store.claim_next(&worker).await.unwrap().unwrap();
        assert_eq!(job.id.as_str(), "second");
        assert!(store.claim_next(&worker).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_time_gates_claims() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        let id = store.create(new_job("a", "false")).await.unwrap().id;
        store.claim_next(&WorkerId::numbered(1)).await.unwrap();

        store
            .set_next_retry_at(&id, Utc::now() + chrono::Duration::seconds(60))
            .await
            .unwrap();
        store.transition(&id, JobState::Pending, "boom").await.unwrap();
        assert!(store.claim_next(&WorkerId::numbered(1)).await.unwrap().is_none());

        store.set_next_retry_at(&id, Utc::now()).await.unwrap();
        let job = store.claim_next(&WorkerId::numbered(1)).await.unwrap().unwrap();
        assert!(job.next_retry_at.is_none());
        assert_eq!(job.last_error, "boom");
    }

    #[tokio::test]
    async fn transition_releases_lock() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        let id = store.create(new_job("a", "true")).await.unwrap().id;
        store.claim_next(&WorkerId::numbered(1)).await.unwrap();
        store.increment_attempts(&id).await.unwrap();
        store.save_output(&id, "hi\n").await.unwrap();
        store.transition(&id, JobState::Completed, "").await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.output, "hi\n");
        assert!(job.locked_by.is_none() && job.locked_at.is_none());

        let missing = JobId::new("missing").unwrap();
        assert_eq!(
            store.transition(&missing, JobState::Dead, "").await,
            Err(JobStoreError::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn stale_processing_rows_are_reclaimed_once() {
        let store = SqliteJobStore::open_in_memory()
            .await
            .unwrap()
            .with_lease(Duration::from_millis(50));
        store.create(new_job("a", "sleep 600")).await.unwrap();

        store.claim_next(&WorkerId::numbered(1)).await.unwrap().unwrap();
        assert!(store.claim_next(&WorkerId::numbered(2)).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let job = store.claim_next(&WorkerId::numbered(2)).await.unwrap().unwrap();
        assert_eq!(job.locked_by, Some(WorkerId::numbered(2)));
        assert!(store.claim_next(&WorkerId::numbered(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_dead_only_applies_to_dead_rows() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        let id = store.create(new_job("a", "false")).await.unwrap().id;
        assert_eq!(
            store.retry_dead(&id).await,
            Err(JobStoreError::NotDead(id.clone()))
        );

        store.claim_next(&WorkerId::numbered(1)).await.unwrap();
        store.increment_attempts(&id).await.unwrap();
        store.transition(&id, JobState::Dead, "gave up").await.unwrap();

        let job = store.retry_dead(&id).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.last_error, "gave up");
        assert_eq!(store.list_by_state(JobState::Dead).await.unwrap().len(), 0);

        let missing = JobId::new("missing").unwrap();
        assert_eq!(
            store.retry_dead(&missing).await,
            Err(JobStoreError::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn counts_and_listing_by_state() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        for i in 0..4 {
            store.create(new_job(&format!("j{i}"), "true")).await.unwrap();
        }
        let claimed = store.claim_next(&WorkerId::numbered(1)).await.unwrap().unwrap();
        store.transition(&claimed.id, JobState::Dead, "x").await.unwrap();

        let counts = store.counts_by_state().await.unwrap();
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.dead, 1);
        assert_eq!(counts.processing, 0);

        let pending: Vec<_> = store
            .list_by_state(JobState::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id.to_string())
            .collect();
        assert_eq!(pending, ["j1", "j2", "j3"]);
    }

    #[tokio::test]
    async fn metrics_and_executions_persist() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        let job = store.create(new_job("m", "echo m")).await.unwrap();

        store.increment(Metric::JobsProcessed).await.unwrap();
        store.increment(Metric::JobsProcessed).await.unwrap();
        store.increment(Metric::JobsSucceeded).await.unwrap();
        assert_eq!(store.counter(Metric::JobsProcessed).await.unwrap(), 2);
        assert_eq!(store.counter(Metric::JobsTimeout).await.unwrap(), 0);

        let started = now_truncated();
        let completed = started + chrono::Duration::milliseconds(250);
        let record = ExecutionRecord::new(
            job.id.clone(),
            started,
            completed,
            &queuectl_core::ExecutionOutcome::Success,
            None,
        );
        store.record_execution(&record).await.unwrap();

        assert_eq!(store.executions_for(&job.id).await.unwrap(), vec![record]);

        let recent = store.recent_executions(20).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].command, "echo m");
        assert_eq!(recent[0].duration_ms, 250);

        let stats = store.execution_stats().await.unwrap();
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.recent_24h_count, 1);
        assert_eq!(stats.avg_duration_ms, 250.0);
    }

    #[tokio::test]
    async fn config_upserts() {
        let store = SqliteJobStore::open_in_memory().await.unwrap();
        assert_eq!(store.get_config("max-retries").await.unwrap(), None);

        store.set_config("max-retries", "5").await.unwrap();
        store.set_config("max-retries", "6").await.unwrap();
        assert_eq!(
            store.get_config("max-retries").await.unwrap().as_deref(),
            Some("6")
        );
        assert_eq!(store.list_config().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_FILE);

        {
            let store = SqliteJobStore::open(&path).await.unwrap();
            store.create(new_job("durable", "true")).await.unwrap();
            store.close().await;
        }

        let store = SqliteJobStore::open(&path).await.unwrap();
        let job = store.get(&JobId::new("durable").unwrap()).await.unwrap();
        assert!(job.is_some());
    }
}
