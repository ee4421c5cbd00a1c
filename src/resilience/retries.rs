//! Retry policy.
//!
//! # Responsibilities
//! - Decide whether a failed item gets another attempt
//! - Compute the delay before that attempt (fixed, linear, exponential)
//!
//! # Design Decisions
//! - Pure functions of the attempt number; no hidden state
//! - Jitter is opt-in and applied by the caller, keeping `next_delay` deterministic

use std::time::Duration;

use crate::config::{RetryConfig, RetryStrategy};
use crate::resilience::backoff::calculate_backoff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self::new(RetryStrategy::FixedDelay, delay, max_attempts)
    }

    pub fn linear(base: Duration, max_attempts: u32) -> Self {
        Self::new(RetryStrategy::LinearBackoff, base, max_attempts)
    }

    pub fn exponential(base: Duration, max_attempts: u32) -> Self {
        Self::new(RetryStrategy::ExponentialBackoff, base, max_attempts)
    }

    fn new(strategy: RetryStrategy, base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            strategy,
            base_delay,
            max_delay: None,
            max_attempts,
            jitter: false,
        }
    }

    /// Delay before the next attempt, after `attempt` attempts have been made.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        calculate_backoff(self.strategy, attempt, self.base_delay, self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32, max_attempts: u32) -> bool {
        attempt < max_attempts
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            strategy: config.strategy,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: (config.max_delay_ms > 0).then(|| Duration::from_millis(config.max_delay_ms)),
            max_attempts: config.max_attempts,
            jitter: config.jitter,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_until_max() {
        let policy = RetryPolicy::fixed(Duration::from_millis(10), 3);
        assert!(policy.should_retry(1, 3));
        assert!(policy.should_retry(2, 3));
        assert!(!policy.should_retry(3, 3));
        assert!(!policy.should_retry(4, 3));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            strategy: RetryStrategy::LinearBackoff,
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 500,
            jitter: true,
        });
        assert_eq!(policy.next_delay(2), Duration::from_millis(400));
        assert_eq!(policy.next_delay(3), Duration::from_millis(500));
        assert_eq!(policy.max_attempts, 5);
        assert!(policy.jitter);
    }

    #[test]
    fn test_default_matches_webhook_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.strategy, RetryStrategy::ExponentialBackoff);
        assert_eq!(policy.next_delay(1), Duration::from_secs(5));
        assert_eq!(policy.next_delay(2), Duration::from_secs(10));
    }
}
