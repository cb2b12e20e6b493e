//! Infrastructure layer: SQLite storage, process execution, worker pool, config.

pub mod config;
pub mod jobs;
pub mod metrics;


pub use config::{ConfigEntry, ConfigStore, QueueSettings};
pub use metrics::MetricsRecorder;
