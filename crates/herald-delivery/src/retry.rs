//! Exponential backoff and exhaustion rules.
//!
//! Pure functions only. The delay after a failed cycle is
//! `min(initial_delay * backoff_factor ^ attempts, MAX_RETRY_DELAY)` where
//! `attempts` is the number of failed cycles *before* the one that just
//! failed, so the first retry waits exactly `initial_delay`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_core::WebhookRetryPolicy;
use serde::{Deserialize, Serialize};

/// Upper bound on any single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(5_000);

/// Default growth factor between retries.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Shape of the retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Multiplier per failed cycle. Values below 1 are treated as 1 so the
    /// schedule never shrinks.
    pub backoff_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { initial_delay: DEFAULT_INITIAL_DELAY, backoff_factor: DEFAULT_BACKOFF_FACTOR }
    }
}

impl BackoffPolicy {
    /// Creates a policy from millisecond configuration values.
    pub fn from_millis(initial_delay_ms: u64, backoff_factor: f64) -> Self {
        Self { initial_delay: Duration::from_millis(initial_delay_ms), backoff_factor }
    }

    /// Applies a per-webhook override on top of this policy. Fields the
    /// override leaves unset keep their current value.
    #[must_use]
    pub fn with_override(self, overrides: Option<WebhookRetryPolicy>) -> Self {
        let Some(overrides) = overrides else {
            return self;
        };
        Self {
            initial_delay: overrides
                .initial_delay_ms
                .map_or(self.initial_delay, Duration::from_millis),
            backoff_factor: overrides.backoff_factor.unwrap_or(self.backoff_factor),
        }
    }

    /// Delay to wait after a failure, given the failed cycles before it.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let cap_ms = MAX_RETRY_DELAY.as_millis() as f64;
        let factor = if self.backoff_factor.is_finite() { self.backoff_factor.max(1.0) } else { 1.0 };
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let raw_ms = self.initial_delay.as_millis() as f64 * factor.powi(exponent);

        if !raw_ms.is_finite() || raw_ms >= cap_ms {
            return MAX_RETRY_DELAY;
        }
        Duration::from_millis(raw_ms.max(0.0) as u64)
    }
}

/// Absolute time of the next retry.
pub fn next_retry_time(attempts: u32, policy: &BackoffPolicy, now: DateTime<Utc>) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(policy.delay_for(attempts))
        .unwrap_or_else(|_| chrono::Duration::hours(1));
    now + delay
}

/// True once `attempts` has reached the ceiling.
pub fn is_exhausted(attempts: i32, max_attempts: i32) -> bool {
    attempts >= max_attempts
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_schedule_doubles_from_five_seconds() {
        let policy = BackoffPolicy::default();
        let expected = [5, 10, 20, 40, 80, 160, 320, 640, 1280, 2560, 3600, 3600];

        for (attempts, secs) in expected.iter().enumerate() {
            assert_eq!(
                policy.delay_for(attempts as u32),
                Duration::from_secs(*secs),
                "attempts = {attempts}"
            );
        }
    }

    #[test]
    fn next_retry_is_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let policy = BackoffPolicy::default();

        assert_eq!(next_retry_time(0, &policy, now), now + chrono::Duration::seconds(5));
        assert_eq!(next_retry_time(2, &policy, now), now + chrono::Duration::seconds(20));
        assert_eq!(next_retry_time(1_000, &policy, now), now + chrono::Duration::hours(1));
    }

    #[test]
    fn exhaustion_is_inclusive() {
        assert!(!is_exhausted(2, 3));
        assert!(is_exhausted(3, 3));
        assert!(is_exhausted(4, 3));
        assert!(is_exhausted(0, 0));
    }

    #[test]
    fn override_replaces_only_provided_fields() {
        let base = BackoffPolicy::default();

        let both = base.with_override(Some(WebhookRetryPolicy {
            max_attempts: Some(10),
            backoff_factor: Some(3.0),
            initial_delay_ms: Some(1_000),
        }));
        assert_eq!(both, BackoffPolicy::from_millis(1_000, 3.0));

        let factor_only = base.with_override(Some(WebhookRetryPolicy {
            backoff_factor: Some(1.5),
            ..WebhookRetryPolicy::default()
        }));
        assert_eq!(factor_only.initial_delay, DEFAULT_INITIAL_DELAY);
        assert_eq!(factor_only.backoff_factor, 1.5);

        assert_eq!(base.with_override(None), base);
    }

    #[test]
    fn degenerate_factors_never_shrink_the_delay() {
        let shrinking = BackoffPolicy::from_millis(2_000, 0.5);
        assert_eq!(shrinking.delay_for(0), Duration::from_secs(2));
        assert_eq!(shrinking.delay_for(5), Duration::from_secs(2));

        let nan = BackoffPolicy::from_millis(2_000, f64::NAN);
        assert_eq!(nan.delay_for(3), Duration::from_secs(2));

        let huge = BackoffPolicy::from_millis(2_000, f64::INFINITY);
        assert_eq!(huge.delay_for(0), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn delay_is_monotonic_and_capped(
            initial_ms in 0u64..=10_000_000,
            factor in 0.0f64..10.0,
            attempts in 0u32..200,
        ) {
            let policy = BackoffPolicy::from_millis(initial_ms, factor);
            let current = policy.delay_for(attempts);
            let next = policy.delay_for(attempts + 1);

            prop_assert!(current <= next);
            prop_assert!(next <= MAX_RETRY_DELAY);
        }

        #[test]
        fn next_retry_never_precedes_now(attempts in 0u32..64, initial_ms in 0u64..100_000) {
            let now = Utc::now();
            let policy = BackoffPolicy::from_millis(initial_ms, 2.0);
            let at = next_retry_time(attempts, &policy, now);

            prop_assert!(at >= now);
            prop_assert!(at <= now + chrono::Duration::hours(1));
        }
    }
}
