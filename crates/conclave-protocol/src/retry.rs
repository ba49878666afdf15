//! Retry policy for transient write contention.
//!
//! The config writer retries version-mismatch and create races up to a
//! bounded attempt count with a delay between attempts. The default delay
//! schedule is **fixed**, matching the behavior this recipe set inherits:
//! contention on a single config node is short and bounded, so spacing
//! retries evenly drains it without the tail latencies a backoff schedule
//! introduces. Deployments with wider fan-in can opt into
//! [`BackoffStrategy::Exponential`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the inter-attempt delay evolves across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Every retry waits the policy's base delay.
    Fixed,
    /// Each retry multiplies the previous delay, capped at `max_delay`.
    Exponential {
        /// Per-retry delay multiplier (≥ 1)
        multiplier: u32,
        /// Upper bound on any single delay
        max_delay: Duration,
    },
}

/// Attempt bound and delay schedule for a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Must be ≥ 1.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Delay schedule.
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    /// Five attempts, five seconds apart.
    fn default() -> Self {
        Self::fixed(5, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// A fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: BackoffStrategy::Fixed,
        }
    }

    /// An exponential policy starting at `delay` and doubling up to
    /// `max_delay`.
    pub fn exponential(max_attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: BackoffStrategy::Exponential {
                multiplier: 2,
                max_delay,
            },
        }
    }

    /// A fast policy for tests: three attempts, five milliseconds apart.
    pub fn for_testing() -> Self {
        Self::fixed(3, Duration::from_millis(5))
    }

    /// The delay to sleep after the `failed_attempts`-th failure (1-based).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = failed_attempts.saturating_sub(1);
                let factor = multiplier.saturating_pow(exponent);
                self.delay.saturating_mul(factor).min(max_delay)
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry policy needs at least one attempt".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(4, Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(3), Duration::from_millis(10));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy::exponential(
            6,
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(50));
        assert_eq!(policy.delay_for(5), Duration::from_millis(50));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn policies_round_trip_through_serde() {
        let policy = RetryPolicy::exponential(
            4,
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        let encoded = serde_json::to_vec(&policy).unwrap();
        let decoded: RetryPolicy = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, policy);
    }

    #[test]
    fn default_matches_inherited_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(5));
        assert_eq!(policy.backoff, BackoffStrategy::Fixed);
    }
}
