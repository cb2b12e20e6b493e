//! Aggregate counter keys.

use serde::{Deserialize, Serialize};

/// Monotonic counters maintained by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Every attempt, successful or not.
    JobsProcessed,
    JobsSucceeded,
    /// Every failing attempt, retried or not.
    JobsFailed,
    /// Failing attempts that hit their deadline (also counted as failed).
    JobsTimeout,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::JobsProcessed,
        Metric::JobsSucceeded,
        Metric::JobsFailed,
        Metric::JobsTimeout,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Metric::JobsProcessed => "jobs_processed",
            Metric::JobsSucceeded => "jobs_succeeded",
            Metric::JobsFailed => "jobs_failed",
            Metric::JobsTimeout => "jobs_timeout",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
