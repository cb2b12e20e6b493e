//! Persistent key/value configuration and typed queue settings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use queuectl_core::{ConfigKey, RetryPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES};

use crate::jobs::JobStoreError;

/// One row of the config table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// String key/value store. Values are validated by the caller
/// (see [`queuectl_core::validate_entry`]).
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, key: &str) -> Result<Option<String>, JobStoreError>;

    /// Insert or overwrite `key`.
    async fn set_config(&self, key: &str, value: &str) -> Result<(), JobStoreError>;

    /// All entries ordered by key.
    async fn list_config(&self) -> Result<Vec<ConfigEntry>, JobStoreError>;
}

/// Typed view over the config store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueSettings {
    /// Applied to submissions that omit `max_retries`.
    pub max_retries: u32,
    /// Read once when a pool is built.
    pub backoff_base: f64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl QueueSettings {
    /// Resolve settings, falling back to defaults for missing or unparsable
    /// values.
    pub async fn load<C: ConfigStore + ?Sized>(store: &C) -> Result<Self, JobStoreError> {
        let mut settings = Self::default();

        if let Some(raw) = store.get_config(ConfigKey::MaxRetries.as_str()).await? {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => settings.max_retries = n,
                _ => warn!(key = %ConfigKey::MaxRetries, value = %raw, "ignoring invalid config value"),
            }
        }

        if let Some(raw) = store.get_config(ConfigKey::BackoffBase.as_str()).await? {
            match raw.trim().parse::<f64>() {
                Ok(b) if b.is_finite() && b >= 1.0 => settings.backoff_base = b,
                _ => warn!(key = %ConfigKey::BackoffBase, value = %raw, "ignoring invalid config value"),
            }
        }

        Ok(settings)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.backoff_base)
    }
}
