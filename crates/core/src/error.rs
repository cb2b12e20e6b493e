//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures at the submission boundary
/// (malformed input, unknown states, bad config values). Storage and process
/// failures belong to `queuectl-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The submitted payload was not a well-formed job description.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// A required field was absent or empty.
    #[error("missing job {0}")]
    MissingField(&'static str),

    /// A value failed validation (e.g. a non-positive retry count).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A state name did not match any known job state.
    #[error("invalid state: {0} (valid states are: pending, processing, completed, failed, dead)")]
    InvalidState(String),

    /// A configuration value could not be parsed for its key.
    #[error("invalid value for {key}: {value} ({expected})")]
    InvalidConfigValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState(state.into())
    }
}
