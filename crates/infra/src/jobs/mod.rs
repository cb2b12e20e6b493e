//! Durable shell-command job queue.
//!
//! ## Components
//!
//! - `JobStore`: persistence with an atomic conditional claim (SQLite or in-memory)
//! - `ShellExecutor`: runs one attempt of a job's command under its deadline
//! - `WorkerPool`: N worker loops applying the retry policy after each attempt
//! - `LivenessMarker`: pid file advertising a running pool to other processes
//!
//! Jobs that exhaust their retries move to the dead-letter queue (state `dead`)
//! and can be moved back to `pending` with `JobStore::retry_dead`.

pub mod executor;
pub mod liveness;
pub mod pool;
pub mod sqlite;
pub mod store;

pub use executor::{Execution, ShellExecutor};
pub use liveness::{is_alive, LivenessMarker, PoolMarker, MARKER_FILE};
pub use pool::{process_job, AttemptOutcome, PoolConfig, PoolError, WorkerPool};
pub use sqlite::{SqliteJobStore, DATABASE_FILE};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
