//! Worker pool: N concurrent claim/execute/record loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use queuectl_core::{ExecutionRecord, Job, JobState, Metric, RetryDecision, RetryPolicy, WorkerId};

use super::executor::ShellExecutor;
use super::liveness::{LivenessMarker, PoolMarker};
use super::store::JobStore;
use crate::metrics::MetricsRecorder;

/// Pool lifecycle error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("workers are already running (pid {0})")]
    AlreadyRunning(u32),
    #[error("no workers are running")]
    NotRunning,
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("liveness marker: {0}")]
    Marker(String),
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Backoff applied to failed attempts.
    pub retry_policy: RetryPolicy,
    /// Sleep after a poll that found nothing to claim.
    pub idle_interval: Duration,
    /// Sleep after a store error while polling.
    pub error_interval: Duration,
    /// Pid file written on start and removed on stop.
    pub marker: Option<LivenessMarker>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            idle_interval: Duration::from_millis(500),
            error_interval: Duration::from_secs(1),
            marker: None,
        }
    }
}

impl PoolConfig {
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_marker(mut self, marker: LivenessMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn with_error_interval(mut self, interval: Duration) -> Self {
        self.error_interval = interval;
        self
    }
}

/// What one attempt did to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    /// Back to pending until `retry_at`.
    Retrying {
        attempts: u32,
        delay: Duration,
        retry_at: DateTime<Utc>,
    },
    /// Retries exhausted; moved to the DLQ.
    Dead { attempts: u32 },
}

struct Running {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// Owns a set of worker loops sharing one store.
///
/// Workers never coordinate with each other directly; the store's
/// conditional claim is the only synchronisation point. `stop` cancels and
/// then waits, so an in-flight attempt always runs to completion.
pub struct WorkerPool<S> {
    store: Arc<S>,
    executor: ShellExecutor,
    config: PoolConfig,
    running: Option<Running>,
}

impl<S> WorkerPool<S>
where
    S: JobStore + MetricsRecorder + 'static,
{
    pub fn new(store: Arc<S>, config: PoolConfig) -> Self {
        Self {
            store,
            executor: ShellExecutor::default(),
            config,
            running: None,
        }
    }

    pub fn with_executor(mut self, executor: ShellExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Token cancelled by `stop`; `None` while stopped.
    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.running.as_ref().map(|r| r.cancel.clone())
    }

    /// Spawn `workers` loops named `worker-1 .. worker-n`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, workers: usize) -> Result<(), PoolError> {
        if workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        if self.running.is_some() {
            return Err(PoolError::AlreadyRunning(std::process::id()));
        }
        if let Some(marker) = &self.config.marker {
            if let Some(active) = marker.active()? {
                return Err(PoolError::AlreadyRunning(active.pid));
            }
            marker.write(PoolMarker::current(workers))?;
        }

        let cancel = CancellationToken::new();
        let handles = (1..=workers)
            .map(|i| {
                let worker = Worker {
                    id: WorkerId::numbered(i),
                    store: self.store.clone(),
                    executor: self.executor.clone(),
                    config: self.config.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        self.running = Some(Running {
            cancel,
            workers: handles,
        });
        info!(workers, pid = std::process::id(), "worker pool started");
        Ok(())
    }

    /// Cancel every loop, wait for in-flight attempts, remove the marker.
    pub async fn stop(&mut self) -> Result<(), PoolError> {
        let Some(running) = self.running.take() else {
            return Err(PoolError::NotRunning);
        };
        info!("stopping workers");

        running.cancel.cancel();
        for handle in running.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }

        if let Some(marker) = &self.config.marker {
            if let Err(e) = marker.remove() {
                warn!(error = %e, "failed to remove pid file");
            }
        }
        info!("all workers stopped");
        Ok(())
    }
}

impl<S> Drop for WorkerPool<S> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

struct Worker<S> {
    id: WorkerId,
    store: Arc<S>,
    executor: ShellExecutor,
    config: PoolConfig,
    cancel: CancellationToken,
}

impl<S> Worker<S>
where
    S: JobStore + MetricsRecorder + 'static,
{
    async fn run(self) {
        info!(worker = %self.id, "worker started");

        while !self.cancel.is_cancelled() {
            match self.store.claim_next(&self.id).await {
                Ok(Some(job)) => {
                    info!(worker = %self.id, job_id = %job.id, command = %job.command, "processing job");
                    process_job(
                        self.store.as_ref(),
                        &self.executor,
                        &self.config.retry_policy,
                        &self.id,
                        &job,
                    )
                    .await;
                }
                Ok(None) => self.pause(self.config.idle_interval).await,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "failed to claim job");
                    self.pause(self.config.error_interval).await;
                }
            }
        }

        info!(worker = %self.id, "worker shutting down");
    }

    async fn pause(&self, interval: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Run one attempt of a claimed job and record its result.
///
/// Store failures are logged and never abort the attempt; the returned
/// outcome reflects the decision taken, even if persisting it failed.
pub async fn process_job<S>(
    store: &S,
    executor: &ShellExecutor,
    policy: &RetryPolicy,
    worker: &WorkerId,
    job: &Job,
) -> AttemptOutcome
where
    S: JobStore + MetricsRecorder + ?Sized,
{
    if let Err(e) = store.increment_attempts(&job.id).await {
        error!(worker = %worker, job_id = %job.id, error = %e, "failed to increment attempts");
    }

    let started_at = Utc::now();
    let execution = executor.run(job).await;
    let completed_at = Utc::now();

    if let Err(e) = store.save_output(&job.id, &execution.output).await {
        error!(worker = %worker, job_id = %job.id, error = %e, "failed to save job output");
    }

    let error_message = execution.error_message();
    let record = ExecutionRecord::new(
        job.id.clone(),
        started_at,
        completed_at,
        &execution.outcome,
        error_message.clone(),
    );

    let Some(message) = error_message else {
        info!(worker = %worker, job_id = %job.id, "job completed successfully");
        if let Err(e) = store.transition(&job.id, JobState::Completed, "").await {
            error!(worker = %worker, job_id = %job.id, error = %e, "failed to update job state");
        }
        bump(store, worker, Metric::JobsProcessed).await;
        bump(store, worker, Metric::JobsSucceeded).await;
        save_record(store, worker, &record).await;
        return AttemptOutcome::Completed;
    };

    warn!(worker = %worker, job_id = %job.id, error = %message, "job failed");

    // Fresh read: the claimed snapshot predates our own increment.
    let attempts = match store.get(&job.id).await {
        Ok(Some(current)) => current.attempts,
        Ok(None) => {
            error!(worker = %worker, job_id = %job.id, "job vanished while running");
            job.attempts.saturating_add(1)
        }
        Err(e) => {
            error!(worker = %worker, job_id = %job.id, error = %e, "failed to read attempt count");
            job.attempts.saturating_add(1)
        }
    };

    bump(store, worker, Metric::JobsProcessed).await;
    bump(store, worker, Metric::JobsFailed).await;
    if execution.outcome.is_timeout() {
        bump(store, worker, Metric::JobsTimeout).await;
    }
    save_record(store, worker, &record).await;

    match policy.decide(attempts, job.max_retries) {
        RetryDecision::Dead => {
            warn!(
                worker = %worker,
                job_id = %job.id,
                max_retries = job.max_retries,
                "job exceeded max retries, moving to DLQ"
            );
            if let Err(e) = store.transition(&job.id, JobState::Dead, &message).await {
                error!(worker = %worker, job_id = %job.id, error = %e, "failed to move job to DLQ");
            }
            AttemptOutcome::Dead { attempts }
        }
        RetryDecision::Retry => {
            let delay = policy.delay_for_attempt(attempts);
            let now = Utc::now();
            let retry_at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            info!(
                worker = %worker,
                job_id = %job.id,
                attempt = attempts,
                max_retries = job.max_retries,
                delay_secs = delay.as_secs(),
                "job will retry"
            );
            if let Err(e) = store.set_next_retry_at(&job.id, retry_at).await {
                error!(worker = %worker, job_id = %job.id, error = %e, "failed to set next retry");
            }
            if let Err(e) = store.transition(&job.id, JobState::Pending, &message).await {
                error!(worker = %worker, job_id = %job.id, error = %e, "failed to update job state for retry");
            }
            AttemptOutcome::Retrying {
                attempts,
                delay,
                retry_at,
            }
        }
    }
}

async fn bump<S>(store: &S, worker: &WorkerId, metric: Metric)
where
    S: MetricsRecorder + ?Sized,
{
    if let Err(e) = store.increment(metric).await {
        error!(worker = %worker, metric = %metric, error = %e, "failed to increment metric");
    }
}

async fn save_record<S>(store: &S, worker: &WorkerId, record: &ExecutionRecord)
where
    S: MetricsRecorder + ?Sized,
{
    if let Err(e) = store.record_execution(record).await {
        error!(worker = %worker, job_id = %record.job_id, error = %e, "failed to record execution");
    } else {
        debug!(worker = %worker, job_id = %record.job_id, duration_ms = record.duration_ms, "execution recorded");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use queuectl_core::{ExecutionSummary, JobId, NewJob, StateCounts};

    use crate::jobs::{InMemoryJobStore, JobStoreError};

    /// In-memory store whose first `failures` claims fail with a storage error.
    struct FlakyClaims {
        inner: InMemoryJobStore,
        failures: AtomicUsize,
        claim_errors: AtomicUsize,
    }

    impl FlakyClaims {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryJobStore::new(),
                failures: AtomicUsize::new(failures),
                claim_errors: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl JobStore for FlakyClaims {
        async fn create(&self, job: NewJob) -> Result<Job, JobStoreError> {
            self.inner.create(job).await
        }

        async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Job>, JobStoreError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                self.claim_errors.fetch_add(1, Ordering::SeqCst);
                return Err(JobStoreError::storage("database is locked"));
            }
            self.inner.claim_next(worker).await
        }

        async fn transition(
            &self,
            job_id: &JobId,
            state: JobState,
            last_error: &str,
        ) -> Result<(), JobStoreError> {
            self.inner.transition(job_id, state, last_error).await
        }

        async fn increment_attempts(&self, job_id: &JobId) -> Result<(), JobStoreError> {
            self.inner.increment_attempts(job_id).await
        }

        async fn set_next_retry_at(
            &self,
            job_id: &JobId,
            when: DateTime<Utc>,
        ) -> Result<(), JobStoreError> {
            self.inner.set_next_retry_at(job_id, when).await
        }

        async fn save_output(&self, job_id: &JobId, output: &str) -> Result<(), JobStoreError> {
            self.inner.save_output(job_id, output).await
        }

        async fn get(&self, job_id: &JobId) -> Result<Option<Job>, JobStoreError> {
            self.inner.get(job_id).await
        }

        async fn list_all(&self) -> Result<Vec<Job>, JobStoreError> {
            self.inner.list_all().await
        }

        async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, JobStoreError> {
            self.inner.list_by_state(state).await
        }

        async fn counts_by_state(&self) -> Result<StateCounts, JobStoreError> {
            self.inner.counts_by_state().await
        }

        async fn retry_dead(&self, job_id: &JobId) -> Result<Job, JobStoreError> {
            self.inner.retry_dead(job_id).await
        }
    }

    #[async_trait::async_trait]
    impl MetricsRecorder for FlakyClaims {
        async fn increment(&self, metric: Metric) -> Result<(), JobStoreError> {
            self.inner.increment(metric).await
        }

        async fn counter(&self, metric: Metric) -> Result<i64, JobStoreError> {
            self.inner.counter(metric).await
        }

        async fn record_execution(&self, record: &ExecutionRecord) -> Result<(), JobStoreError> {
            self.inner.record_execution(record).await
        }

        async fn executions_for(
            &self,
            job_id: &JobId,
        ) -> Result<Vec<ExecutionRecord>, JobStoreError> {
            self.inner.executions_for(job_id).await
        }

        async fn recent_executions(
            &self,
            limit: usize,
        ) -> Result<Vec<ExecutionSummary>, JobStoreError> {
            self.inner.recent_executions(limit).await
        }

        async fn duration_summary(
            &self,
            since: DateTime<Utc>,
        ) -> Result<(i64, f64), JobStoreError> {
            self.inner.duration_summary(since).await
        }
    }

    fn new_job(id: &str, command: &str, max_retries: u32) -> NewJob {
        NewJob {
            id: JobId::new(id).unwrap(),
            command: command.to_string(),
            max_retries,
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn success_completes_and_records() {
        let store = InMemoryJobStore::new();
        store.create(new_job("a", "echo hi", 3)).await.unwrap();
        let worker = WorkerId::numbered(1);
        let job = store.claim_next(&worker).await.unwrap().unwrap();

        let outcome = process_job(&store, &ShellExecutor::new(), &RetryPolicy::default(), &worker, &job).await;
        assert_eq!(outcome, AttemptOutcome::Completed);

        let job = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.output, "hi\n");
        assert!(job.last_error.is_empty());
        assert_eq!(store.counter(Metric::JobsSucceeded).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failure_schedules_retry_with_backoff() {
        let store = InMemoryJobStore::new();
        store.create(new_job("b", "exit 1", 3)).await.unwrap();
        let worker = WorkerId::numbered(1);
        let job = store.claim_next(&worker).await.unwrap().unwrap();

        let before = Utc::now();
        let outcome = process_job(&store, &ShellExecutor::new(), &RetryPolicy::new(2.0), &worker, &job).await;
        let AttemptOutcome::Retrying { attempts, delay, retry_at } = outcome else {
            panic!("expected retry, got {outcome:?}");
        };
        assert_eq!(attempts, 1);
        assert_eq!(delay, Duration::from_secs(2));
        assert!(retry_at >= before + chrono::Duration::seconds(2));

        let job = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.next_retry_at, Some(retry_at));
        assert_eq!(job.last_error, "command exited with code 1: ");
        assert!(job.locked_by.is_none());
    }

    #[tokio::test]
    async fn start_twice_is_rejected_and_stop_requires_start() {
        let store = InMemoryJobStore::arc();
        let mut pool = WorkerPool::new(store, PoolConfig::default());

        assert_eq!(pool.stop().await, Err(PoolError::NotRunning));
        assert_eq!(pool.start(0), Err(PoolError::NoWorkers));

        pool.start(2).unwrap();
        assert!(pool.is_running());
        assert!(matches!(pool.start(1), Err(PoolError::AlreadyRunning(_))));

        pool.stop().await.unwrap();
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn live_marker_blocks_a_second_pool() {
        let dir = tempfile::tempdir().unwrap();
        let marker = LivenessMarker::in_dir(dir.path());
        let config = PoolConfig::default().with_marker(marker.clone());

        let mut first = WorkerPool::new(InMemoryJobStore::arc(), config.clone());
        first.start(3).unwrap();
        assert_eq!(marker.active().unwrap().map(|m| m.workers), Some(3));

        let mut second = WorkerPool::new(InMemoryJobStore::arc(), config);
        assert_eq!(
            second.start(1),
            Err(PoolError::AlreadyRunning(std::process::id()))
        );

        first.stop().await.unwrap();
        assert_eq!(marker.read().unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_in_flight_attempt() {
        let store = InMemoryJobStore::arc();
        store.create(new_job("slow", "sleep 1; echo done", 1)).await.unwrap();

        let mut pool = WorkerPool::new(
            store.clone(),
            PoolConfig::default().with_idle_interval(Duration::from_millis(20)),
        );
        pool.start(1).unwrap();

        // Wait until the job is claimed, then stop mid-attempt.
        let id = JobId::new("slow").unwrap();
        for _ in 0..100 {
            if store.get(&id).await.unwrap().unwrap().state == JobState::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.stop().await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.output, "done\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn claim_errors_are_retried_without_ending_the_worker() {
        let store = Arc::new(FlakyClaims::new(2));
        store.create(new_job("after-errors", "echo ok", 1)).await.unwrap();

        let config = PoolConfig::default()
            .with_idle_interval(Duration::from_millis(20))
            .with_error_interval(Duration::from_millis(50));
        let mut pool = WorkerPool::new(store.clone(), config);
        pool.start(1).unwrap();

        let id = JobId::new("after-errors").unwrap();
        let mut state = JobState::Pending;
        for _ in 0..100 {
            state = store.get(&id).await.unwrap().unwrap().state;
            if state == JobState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.stop().await.unwrap();

        assert_eq!(store.claim_errors.load(Ordering::SeqCst), 2);
        assert_eq!(state, JobState::Completed);
    }
}
