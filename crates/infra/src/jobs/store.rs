//! Job storage abstraction and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use queuectl_core::{
    ExecutionRecord, ExecutionSummary, Job, JobId, JobState, Metric, NewJob, StateCounts, WorkerId,
    LEASE_WINDOW,
};

use crate::config::{ConfigEntry, ConfigStore};
use crate::metrics::MetricsRecorder;

/// Durable record of jobs and their state.
///
/// Every mutation is a single conditional write; callers never hold a lock
/// across calls. `claim_next` is the only coordination point between workers.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job. Fails with `DuplicateId` without touching the
    /// existing row.
    async fn create(&self, job: NewJob) -> Result<Job, JobStoreError>;

    /// Claim the oldest eligible job for `worker`.
    ///
    /// Returns `None` when nothing is eligible or when another worker won the
    /// conditional write first.
    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Job>, JobStoreError>;

    /// Overwrite state and `last_error`, releasing the lock.
    ///
    /// `next_retry_at` survives only when moving to `pending`.
    async fn transition(
        &self,
        job_id: &JobId,
        state: JobState,
        last_error: &str,
    ) -> Result<(), JobStoreError>;

    async fn increment_attempts(&self, job_id: &JobId) -> Result<(), JobStoreError>;

    async fn set_next_retry_at(
        &self,
        job_id: &JobId,
        when: DateTime<Utc>,
    ) -> Result<(), JobStoreError>;

    /// Persist the combined output of the latest attempt.
    async fn save_output(&self, job_id: &JobId, output: &str) -> Result<(), JobStoreError>;

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>, JobStoreError>;

    /// All jobs, oldest first.
    async fn list_all(&self) -> Result<Vec<Job>, JobStoreError>;

    /// Jobs in `state`, oldest first.
    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, JobStoreError>;

    async fn counts_by_state(&self) -> Result<StateCounts, JobStoreError>;

    /// Move a dead job back to pending (attempts reset to zero).
    async fn retry_dead(&self, job_id: &JobId) -> Result<Job, JobStoreError>;
}

/// Store error, shared by the job, metrics and config stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job with ID {0} already exists")]
    DuplicateId(JobId),
    #[error("job {0} is not in the dead letter queue")]
    NotDead(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Insertion order doubles as the FIFO tie-breaker.
    jobs: Vec<Job>,
    executions: Vec<ExecutionRecord>,
    metrics: BTreeMap<&'static str, (i64, DateTime<Utc>)>,
    config: BTreeMap<String, ConfigEntry>,
}

impl MemoryState {
    fn job_mut(&mut self, job_id: &JobId) -> Result<&mut Job, JobStoreError> {
        self.jobs
            .iter_mut()
            .find(|j| &j.id == job_id)
            .ok_or_else(|| JobStoreError::NotFound(job_id.clone()))
    }
}

/// In-memory store for tests/dev.
///
/// Holds jobs, execution records, counters and config behind one lock, so
/// every operation is trivially atomic.
#[derive(Debug)]
pub struct InMemoryJobStore {
    state: RwLock<MemoryState>,
    lease: Duration,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            lease: LEASE_WINDOW,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Override the claim lease window.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, JobStoreError> {
        self.state
            .read()
            .map_err(|_| JobStoreError::storage("lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>, JobStoreError> {
        self.state
            .write()
            .map_err(|_| JobStoreError::storage("lock poisoned"))
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<Job, JobStoreError> {
        let mut state = self.write()?;
        if state.jobs.iter().any(|j| j.id == job.id) {
            return Err(JobStoreError::DuplicateId(job.id));
        }
        let job = Job::from_new(job, Utc::now());
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Job>, JobStoreError> {
        let mut state = self.write()?;
        let now = Utc::now();

        // Oldest eligible row; `min_by_key` keeps the first of equal keys.
        let Some(job) = state
            .jobs
            .iter_mut()
            .filter(|j| j.is_claimable(now, self.lease))
            .min_by_key(|j| j.created_at)
        else {
            return Ok(None);
        };

        job.state = JobState::Processing;
        job.locked_by = Some(worker.clone());
        job.locked_at = Some(now);
        job.next_retry_at = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn transition(
        &self,
        job_id: &JobId,
        new_state: JobState,
        last_error: &str,
    ) -> Result<(), JobStoreError> {
        let mut state = self.write()?;
        let job = state.job_mut(job_id)?;
        job.state = new_state;
        job.last_error = last_error.to_string();
        job.updated_at = Utc::now();
        job.locked_by = None;
        job.locked_at = None;
        if new_state != JobState::Pending {
            job.next_retry_at = None;
        }
        Ok(())
    }

    async fn increment_attempts(&self, job_id: &JobId) -> Result<(), JobStoreError> {
        let mut state = self.write()?;
        let job = state.job_mut(job_id)?;
        job.attempts = job.attempts.saturating_add(1);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn set_next_retry_at(
        &self,
        job_id: &JobId,
        when: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        let mut state = self.write()?;
        let job = state.job_mut(job_id)?;
        job.next_retry_at = Some(when);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn save_output(&self, job_id: &JobId, output: &str) -> Result<(), JobStoreError> {
        let mut state = self.write()?;
        let job = state.job_mut(job_id)?;
        job.output = output.to_string();
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>, JobStoreError> {
        let state = self.read()?;
        Ok(state.jobs.iter().find(|j| &j.id == job_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Job>, JobStoreError> {
        let state = self.read()?;
        let mut jobs = state.jobs.clone();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn list_by_state(&self, filter: JobState) -> Result<Vec<Job>, JobStoreError> {
        let state = self.read()?;
        let mut jobs: Vec<_> = state
            .jobs
            .iter()
            .filter(|j| j.state == filter)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn counts_by_state(&self) -> Result<StateCounts, JobStoreError> {
        let state = self.read()?;
        let mut counts = StateCounts::default();
        for job in &state.jobs {
            counts.add(job.state, 1);
        }
        Ok(counts)
    }

    async fn retry_dead(&self, job_id: &JobId) -> Result<Job, JobStoreError> {
        let mut state = self.write()?;
        let job = state.job_mut(job_id)?;
        if job.state != JobState::Dead {
            return Err(JobStoreError::NotDead(job_id.clone()));
        }
        job.state = JobState::Pending;
        job.attempts = 0;
        job.locked_by = None;
        job.locked_at = None;
        job.next_retry_at = None;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

#[async_trait::async_trait]
impl MetricsRecorder for InMemoryJobStore {
    async fn increment(&self, metric: Metric) -> Result<(), JobStoreError> {
        let mut state = self.write()?;
        let now = Utc::now();
        let entry = state.metrics.entry(metric.key()).or_insert((0, now));
        entry.0 += 1;
        entry.1 = now;
        Ok(())
    }

    async fn counter(&self, metric: Metric) -> Result<i64, JobStoreError> {
        let state = self.read()?;
        Ok(state.metrics.get(metric.key()).map_or(0, |(v, _)| *v))
    }

    async fn record_execution(&self, record: &ExecutionRecord) -> Result<(), JobStoreError> {
        let mut state = self.write()?;
        state.executions.push(record.clone());
        Ok(())
    }

    async fn executions_for(&self, job_id: &JobId) -> Result<Vec<ExecutionRecord>, JobStoreError> {
        let state = self.read()?;
        Ok(state
            .executions
            .iter()
            .filter(|e| &e.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionSummary>, JobStoreError> {
        let state = self.read()?;
        let mut joined: Vec<ExecutionSummary> = state
            .executions
            .iter()
            .filter_map(|e| {
                let job = state.jobs.iter().find(|j| j.id == e.job_id)?;
                Some(ExecutionSummary {
                    job_id: e.job_id.clone(),
                    command: job.command.clone(),
                    state: job.state,
                    started_at: e.started_at,
                    completed_at: e.completed_at,
                    duration_ms: e.duration_ms,
                    success: e.success,
                    timeout: e.timed_out,
                    error: e.error.clone(),
                })
            })
            .collect();
        // Stable sort keeps later appends ahead after the reverse.
        joined.sort_by_key(|e| e.started_at);
        joined.reverse();
        joined.truncate(limit);
        Ok(joined)
    }

    async fn duration_summary(&self, since: DateTime<Utc>) -> Result<(i64, f64), JobStoreError> {
        let state = self.read()?;
        let window: Vec<_> = state
            .executions
            .iter()
            .filter(|e| e.started_at > since)
            .collect();
        let count = window.len() as i64;
        let avg = if window.is_empty() {
            0.0
        } else {
            window.iter().map(|e| e.duration_ms as f64).sum::<f64>() / window.len() as f64
        };
        Ok((count, avg))
    }
}

#[async_trait::async_trait]
impl ConfigStore for InMemoryJobStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>, JobStoreError> {
        let state = self.read()?;
        Ok(state.config.get(key).map(|e| e.value.clone()))
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<(), JobStoreError> {
        let mut state = self.write()?;
        state.config.insert(
            key.to_string(),
            ConfigEntry {
                key: key.to_string(),
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_config(&self) -> Result<Vec<ConfigEntry>, JobStoreError> {
        let state = self.read()?;
        Ok(state.config.values().cloned().collect())
    }
}
