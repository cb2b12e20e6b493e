//! Execution records and aggregate counters.

use chrono::{DateTime, Utc};

use queuectl_core::{ExecutionRecord, ExecutionStats, ExecutionSummary, JobId, Metric};

use crate::jobs::JobStoreError;

/// Window (hours) used for `avg_duration_ms` and `recent_24h_count`.
pub const STATS_WINDOW_HOURS: i64 = 24;

/// Records per-attempt outcomes and monotonic counters.
#[async_trait::async_trait]
pub trait MetricsRecorder: Send + Sync {
    /// Add one to `metric`, creating it at 1 if absent.
    async fn increment(&self, metric: Metric) -> Result<(), JobStoreError>;

    /// Current value of `metric` (0 when never incremented).
    async fn counter(&self, metric: Metric) -> Result<i64, JobStoreError>;

    /// Append one execution record. Records are never mutated.
    async fn record_execution(&self, record: &ExecutionRecord) -> Result<(), JobStoreError>;

    /// Every record for `job_id`, in append order.
    async fn executions_for(&self, job_id: &JobId) -> Result<Vec<ExecutionRecord>, JobStoreError>;

    /// Most recent records joined with their job, newest first.
    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionSummary>, JobStoreError>;

    /// `(count, mean duration_ms)` of records started after `since`.
    async fn duration_summary(&self, since: DateTime<Utc>) -> Result<(i64, f64), JobStoreError>;

    async fn execution_stats(&self) -> Result<ExecutionStats, JobStoreError> {
        let total_processed = self.counter(Metric::JobsProcessed).await?;
        let total_succeeded = self.counter(Metric::JobsSucceeded).await?;
        let total_failed = self.counter(Metric::JobsFailed).await?;
        let total_timeout = self.counter(Metric::JobsTimeout).await?;
        let (recent_24h_count, avg_duration_ms) =
            self.duration_summary(Utc::now() - chrono::Duration::hours(STATS_WINDOW_HOURS)).await?;

        Ok(ExecutionStats {
            total_processed,
            total_succeeded,
            total_failed,
            total_timeout,
            success_rate: ExecutionStats::success_rate(total_processed, total_succeeded),
            avg_duration_ms,
            recent_24h_count,
        })
    }
}
