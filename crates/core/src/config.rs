//! Tunable configuration keys and their value rules.

use crate::error::DomainError;

/// Keys with a known meaning in the configuration store.
///
/// Any other key is stored verbatim without validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Default `max_retries` for submissions that omit it.
    MaxRetries,
    /// Exponent base for retry backoff.
    BackoffBase,
}

impl ConfigKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max-retries",
            ConfigKey::BackoffBase => "backoff-base",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "max-retries" => Some(ConfigKey::MaxRetries),
            "backoff-base" => Some(ConfigKey::BackoffBase),
            _ => None,
        }
    }

    /// Check that `value` is acceptable for this key.
    pub fn validate(&self, value: &str) -> Result<(), DomainError> {
        let invalid = |expected| DomainError::InvalidConfigValue {
            key: self.as_str().to_string(),
            value: value.to_string(),
            expected,
        };

        match self {
            ConfigKey::MaxRetries => match value.trim().parse::<u32>() {
                Ok(n) if n > 0 => Ok(()),
                _ => Err(invalid("must be a positive integer")),
            },
            ConfigKey::BackoffBase => match value.trim().parse::<f64>() {
                Ok(b) if b.is_finite() && b >= 1.0 => Ok(()),
                _ => Err(invalid("must be a number >= 1")),
            },
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a `(key, value)` pair before it is written to the store.
pub fn validate_entry(key: &str, value: &str) -> Result<(), DomainError> {
    match ConfigKey::parse(key) {
        Some(known) => known.validate(value),
        None => Ok(()),
    }
}
