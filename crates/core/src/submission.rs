//! Job submission parsing and validation.
//!
//! Submissions arrive as JSON (`{"id": "...", "command": "...", "max_retries": 3,
//! "timeout": 60}`). Validation happens entirely here, before anything touches
//! the store, so a rejected submission has no side effects.

use serde::Deserialize;

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;
use crate::job::NewJob;

/// Retry budget applied when neither the submission nor the config store set one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Raw submission payload. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobSubmission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub max_retries: Option<i64>,
    /// Per-attempt deadline in seconds.
    #[serde(default)]
    pub timeout: Option<i64>,
}

impl JobSubmission {
    /// Parse a JSON payload without validating field contents.
    pub fn from_json(payload: &str) -> DomainResult<Self> {
        serde_json::from_str(payload).map_err(|e| DomainError::InvalidJson(e.to_string()))
    }

    /// Validate the payload and apply defaults.
    ///
    /// `default_max_retries` comes from the configuration store and is used
    /// only when the submission omits `max_retries`. An explicit `0` or
    /// negative `max_retries`/`timeout` is rejected rather than read as
    /// "use the default".
    pub fn validate(self, default_max_retries: u32) -> DomainResult<NewJob> {
        let id = match self.id {
            Some(id) if !id.trim().is_empty() => JobId::new(id)?,
            _ => return Err(DomainError::MissingField("ID")),
        };

        let command = match self.command {
            Some(cmd) if !cmd.trim().is_empty() => cmd,
            _ => return Err(DomainError::MissingField("command")),
        };

        let max_retries = match self.max_retries {
            None => default_max_retries,
            Some(n) => positive_u32("max_retries", n)?,
        };

        let timeout_seconds = self
            .timeout
            .map(|t| positive_u32("timeout", t))
            .transpose()?;

        Ok(NewJob {
            id,
            command,
            max_retries,
            timeout_seconds,
        })
    }
}

/// Parse and validate a submission in one step.
pub fn parse_job(payload: &str, default_max_retries: u32) -> DomainResult<NewJob> {
    JobSubmission::from_json(payload)?.validate(default_max_retries)
}

fn positive_u32(field: &str, value: i64) -> DomainResult<u32> {
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(DomainError::validation(format!(
            "{field} must be a positive integer, got {value}"
        ))),
    }
}
