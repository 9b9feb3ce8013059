//! Backoff policy for long-lived station polling.
//!
//! Pushes to a station are never retried. Only the read-only monitoring
//! streams back off and keep polling after a failure.

use std::time::Duration;

use crate::config::MonitorConfig;

/// Exponential backoff applied after consecutive failed polls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Give up after this many consecutive failures; `None` never gives up.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_consecutive_failures: None,
        }
    }
}

impl From<&MonitorConfig> for BackoffPolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.backoff_initial_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    ///
    /// Doubles from `initial_delay` and saturates at `max_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|limit| failures >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_saturates() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_consecutive_failures: None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_exhaustion() {
        let unbounded = BackoffPolicy::default();
        assert!(!unbounded.is_exhausted(10_000));

        let bounded = BackoffPolicy {
            max_consecutive_failures: Some(3),
            ..BackoffPolicy::default()
        };
        assert!(!bounded.is_exhausted(2));
        assert!(bounded.is_exhausted(3));
    }
}
