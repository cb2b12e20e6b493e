//! Execution outcomes, per-attempt records and aggregate statistics.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;
use crate::job::JobState;

/// Result of running one job attempt. Exactly one per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ExecutionOutcome {
    /// Exit status 0.
    Success,
    /// The deadline passed and the process was killed.
    Timeout(Duration),
    /// The process exited with a non-zero status (`-1` when killed by a signal).
    NonZeroExit(i32),
    /// The process could not be started at all.
    SpawnFailure(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionOutcome::Timeout(_))
    }

    /// Error text recorded as `last_error` and on the execution record.
    ///
    /// Returns `None` for [`ExecutionOutcome::Success`].
    pub fn error_message(&self, output: &str) -> Option<String> {
        match self {
            ExecutionOutcome::Success => None,
            ExecutionOutcome::Timeout(after) => {
                Some(format!("job timeout after {}: {output}", hms(*after)))
            }
            ExecutionOutcome::NonZeroExit(code) => {
                Some(format!("command exited with code {code}: {output}"))
            }
            ExecutionOutcome::SpawnFailure(err) => {
                Some(format!("command execution failed: {err}: {output}"))
            }
        }
    }
}

/// Whole-second duration as `45s`, `5m0s` or `1h2m3s`.
fn hms(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m{s}s"),
        _ => format!("{h}h{m}m{s}s"),
    }
}

/// One row per attempt; append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub job_id: JobId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub success: bool,
    pub timed_out: bool,
    /// Empty on success.
    pub error: String,
}

impl ExecutionRecord {
    pub fn new(
        job_id: JobId,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        outcome: &ExecutionOutcome,
        error: Option<String>,
    ) -> Self {
        Self {
            job_id,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0),
            success: outcome.is_success(),
            timed_out: outcome.is_timeout(),
            error: error.unwrap_or_default(),
        }
    }
}

/// An execution record joined with its job, as shown by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub job_id: JobId,
    pub command: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub success: bool,
    pub timeout: bool,
    pub error: String,
}

/// Aggregate statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_processed: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub total_timeout: i64,
    /// `succeeded / processed * 100`, or 0 when nothing was processed.
    pub success_rate: f64,
    /// Mean attempt duration over the trailing 24 hours.
    pub avg_duration_ms: f64,
    pub recent_24h_count: i64,
}

impl ExecutionStats {
    pub fn success_rate(processed: i64, succeeded: i64) -> f64 {
        if processed > 0 {
            succeeded as f64 / processed as f64 * 100.0
        } else {
            0.0
        }
    }
}
