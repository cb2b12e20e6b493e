//! Job record, lifecycle states and claim eligibility.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{JobId, WorkerId};

/// Deadline applied when a job does not carry its own timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a claim stays exclusive before another worker may reclaim it.
pub const LEASE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Job lifecycle state.
///
/// Transitions produced by the worker are restricted to:
///
/// - `Pending -> Processing` (claim)
/// - `Processing -> Completed` (success)
/// - `Processing -> Pending` (recoverable failure, retry scheduled)
/// - `Processing -> Dead` (retries exhausted)
///
/// `Failed` is accepted for listing and counting but never produced by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    /// Whether the worker state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Pending)
                | (JobState::Processing, JobState::Dead)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            _ => Err(DomainError::invalid_state(s)),
        }
    }
}

/// A validated job that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: JobId,
    pub command: String,
    pub max_retries: u32,
    pub timeout_seconds: Option<u32>,
}

/// A persisted job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    /// Number of execution attempts started so far.
    pub attempts: u32,
    pub max_retries: u32,
    pub timeout_seconds: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Error of the most recent failing attempt (empty after success).
    pub last_error: String,
    /// Earliest time a retried job may be claimed again.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub locked_by: Option<WorkerId>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Combined stdout/stderr of the most recent attempt.
    pub output: String,
}

impl Job {
    /// Materialize a freshly submitted job as a pending row.
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            command: new.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: new.max_retries,
            timeout_seconds: new.timeout_seconds,
            created_at: now,
            updated_at: now,
            last_error: String::new(),
            next_retry_at: None,
            locked_by: None,
            locked_at: None,
            output: String::new(),
        }
    }

    /// Execution deadline for one attempt.
    pub fn timeout(&self) -> Duration {
        match self.timeout_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(u64::from(secs)),
            _ => DEFAULT_TIMEOUT,
        }
    }

    /// Whether the lock on this row is older than `lease`.
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        let Ok(lease) = chrono::Duration::from_std(lease) else {
            return false;
        };
        match self.locked_at {
            Some(at) => now.signed_duration_since(at) > lease,
            None => true,
        }
    }

    /// Claim eligibility at `now`.
    ///
    /// Pending rows are eligible once their retry time (if any) has passed and
    /// they hold no live lock. Processing rows are eligible only when their
    /// lease has expired (abandoned by a crashed worker).
    pub fn is_claimable(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self.state {
            JobState::Pending => {
                let unlocked = self.locked_by.is_none() || self.lease_expired(now, lease);
                let due = self.next_retry_at.is_none_or(|at| at <= now);
                unlocked && due
            }
            JobState::Processing => self.lease_expired(now, lease),
            _ => false,
        }
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl StateCounts {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }

    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Pending => self.pending += count,
            JobState::Processing => self.processing += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::Dead => self.dead += count,
        }
    }

    pub fn total(&self) -> u64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_job(now: DateTime<Utc>) -> Job {
        Job::from_new(
            NewJob {
                id: JobId::new("a").unwrap(),
                command: "echo hi".to_string(),
                max_retries: 3,
                timeout_seconds: None,
            },
            now,
        )
    }

    #[test]
    fn state_names_round_trip() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert_eq!("DEAD".parse::<JobState>().unwrap(), JobState::Dead);
        assert!(matches!(
            "running".parse::<JobState>(),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn only_the_worker_graph_is_allowed() {
        assert!(JobState::Pending.can_transition_to(JobState::Processing));
        assert!(JobState::Processing.can_transition_to(JobState::Completed));
        assert!(JobState::Processing.can_transition_to(JobState::Pending));
        assert!(JobState::Processing.can_transition_to(JobState::Dead));

        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Pending));
        assert!(!JobState::Dead.can_transition_to(JobState::Processing));
    }

    #[test]
    fn new_job_defaults() {
        let now = Utc::now();
        let job = pending_job(now);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.created_at, now);
        assert_eq!(job.timeout(), DEFAULT_TIMEOUT);
        assert!(job.locked_by.is_none());
    }

    #[test]
    fn retry_time_gates_eligibility() {
        let now = Utc::now();
        let mut job = pending_job(now);
        assert!(job.is_claimable(now, LEASE_WINDOW));

        job.next_retry_at = Some(now + chrono::Duration::seconds(2));
        assert!(!job.is_claimable(now, LEASE_WINDOW));
        assert!(job.is_claimable(now + chrono::Duration::seconds(2), LEASE_WINDOW));
    }

    #[test]
    fn processing_rows_are_reclaimable_only_after_lease() {
        let now = Utc::now();
        let mut job = pending_job(now);
        job.state = JobState::Processing;
        job.locked_by = Some(WorkerId::numbered(1));
        job.locked_at = Some(now);

        assert!(!job.is_claimable(now + chrono::Duration::minutes(4), LEASE_WINDOW));
        assert!(job.is_claimable(now + chrono::Duration::minutes(6), LEASE_WINDOW));
    }

    #[test]
    fn terminal_rows_are_never_claimable() {
        let now = Utc::now();
        let mut job = pending_job(now);
        job.state = JobState::Dead;
        assert!(!job.is_claimable(now, LEASE_WINDOW));
        job.state = JobState::Completed;
        assert!(!job.is_claimable(now, LEASE_WINDOW));
    }

    #[test]
    fn state_counts_accumulate() {
        let mut counts = StateCounts::default();
        counts.add(JobState::Pending, 2);
        counts.add(JobState::Dead, 1);
        assert_eq!(counts.get(JobState::Pending), 2);
        assert_eq!(counts.get(JobState::Dead), 1);
        assert_eq!(counts.total(), 3);
    }
}
