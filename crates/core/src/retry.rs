//! Retry policy: backoff delay and the retry/dead decision.
//!
//! Both functions are pure; the worker feeds them the freshly read attempt
//! count after a failing attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponent base used when no `backoff-base` is configured.
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// What to do with a job after a failing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    /// Schedule another attempt after the backoff delay.
    Retry,
    /// Retries exhausted; move to the dead letter queue.
    Dead,
}

/// Backoff delay before the next attempt: `floor(base ^ attempt)` seconds.
///
/// `attempt` is the number of attempts made so far (1-based); values below 1
/// are treated as 1. Results that do not fit a `u64` saturate; a NaN or
/// non-positive power yields zero.
pub fn backoff_delay(attempt: u32, base: f64) -> Duration {
    let attempt = attempt.max(1);
    let secs = base.powf(f64::from(attempt)).floor();
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    if secs.is_infinite() {
        return Duration::from_secs(u64::MAX);
    }
    // float-to-int casts saturate
    Duration::from_secs(secs as u64)
}

/// `Dead` iff `attempts >= max_retries`.
pub fn decide(attempts: u32, max_retries: u32) -> RetryDecision {
    if attempts >= max_retries {
        RetryDecision::Dead
    } else {
        RetryDecision::Retry
    }
}

/// Backoff configuration captured when a worker pool is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff_base: f64) -> Self {
        Self { backoff_base }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.backoff_base)
    }

    pub fn decide(&self, attempts: u32, max_retries: u32) -> RetryDecision {
        decide(attempts, max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn base_two_doubles() {
        assert_eq!(backoff_delay(1, 2.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 2.0), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, 2.0), Duration::from_secs(8));
    }

    #[test]
    fn fractional_bases_are_floored() {
        // 1.5^1 = 1.5, 1.5^2 = 2.25, 1.5^3 = 3.375
        assert_eq!(backoff_delay(1, 1.5), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, 1.5), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, 1.5), Duration::from_secs(3));
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        assert_eq!(backoff_delay(0, 2.0), backoff_delay(1, 2.0));
    }

    #[test]
    fn huge_powers_saturate() {
        assert_eq!(backoff_delay(10_000, 10.0), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn decide_respects_max_retries() {
        assert_eq!(decide(0, 3), RetryDecision::Retry);
        assert_eq!(decide(2, 3), RetryDecision::Retry);
        assert_eq!(decide(3, 3), RetryDecision::Dead);
        assert_eq!(decide(4, 3), RetryDecision::Dead);
        assert_eq!(decide(1, 1), RetryDecision::Dead);
    }

    #[test]
    fn policy_uses_configured_base() {
        let policy = RetryPolicy::new(3.0);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(9));
        assert_eq!(RetryPolicy::default().delay_for_attempt(1), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn delay_is_non_decreasing(base in 1.0f64..10.0, attempt in 1u32..40) {
            prop_assert!(backoff_delay(attempt, base) <= backoff_delay(attempt + 1, base));
        }

        #[test]
        fn integer_bases_are_exact(base in 1u64..6, attempt in 1u32..10) {
            prop_assert_eq!(backoff_delay(attempt, base as f64).as_secs(), base.pow(attempt));
        }
    }
}
