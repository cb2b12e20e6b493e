//! `queuectl-core`: job queue domain building blocks.
//!
//! This crate contains **pure domain** types and policies (no I/O). Storage,
//! process execution and the worker pool live in `queuectl-infra`.

pub mod config;
pub mod error;
pub mod execution;
pub mod id;
pub mod job;
pub mod metrics;
pub mod retry;
pub mod submission;

pub use config::{validate_entry, ConfigKey};
pub use error::{DomainError, DomainResult};
pub use execution::{ExecutionOutcome, ExecutionRecord, ExecutionStats, ExecutionSummary};
pub use id::{JobId, WorkerId};
pub use job::{Job, JobState, NewJob, StateCounts, DEFAULT_TIMEOUT, LEASE_WINDOW};
pub use metrics::Metric;
pub use retry::{backoff_delay, decide, RetryDecision, RetryPolicy, DEFAULT_BACKOFF_BASE};
pub use submission::{parse_job, JobSubmission, DEFAULT_MAX_RETRIES};
