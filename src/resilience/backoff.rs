//! Backoff delay calculation.

use std::time::Duration;

use crate::config::RetryStrategy;
use crate::rng::SharedRng;

/// Delay before attempt `attempt + 1`, given `attempt` failures so far.
///
/// Attempt 0 yields zero. `max` of `None` leaves the delay uncapped;
/// arithmetic saturates instead of overflowing.
pub fn calculate_backoff(
    strategy: RetryStrategy,
    attempt: u32,
    base: Duration,
    max: Option<Duration>,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let delay_ms = match strategy {
        RetryStrategy::FixedDelay => base_ms,
        RetryStrategy::LinearBackoff => base_ms.saturating_mul(attempt as u64),
        RetryStrategy::ExponentialBackoff => {
            let factor = 2u64.saturating_pow(attempt - 1);
            base_ms.saturating_mul(factor)
        }
    };

    let delay = Duration::from_millis(delay_ms);
    match max {
        Some(max) => delay.min(max),
        None => delay,
    }
}

/// Add 0–10% random jitter to a delay.
pub fn apply_jitter(delay: Duration, rng: &SharedRng) -> Duration {
    let delay_ms = delay.as_millis().min(u64::MAX as u128) as u64;
    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rng.gen_inclusive(0, jitter_range - 1)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);

    #[test]
    fn test_strategies() {
        use RetryStrategy::*;

        assert_eq!(calculate_backoff(FixedDelay, 3, BASE, None), BASE);
        assert_eq!(
            calculate_backoff(LinearBackoff, 3, BASE, None),
            Duration::from_millis(300)
        );
        assert_eq!(
            calculate_backoff(ExponentialBackoff, 1, BASE, None),
            Duration::from_millis(100)
        );
        assert_eq!(
            calculate_backoff(ExponentialBackoff, 4, BASE, None),
            Duration::from_millis(800)
        );
        assert_eq!(calculate_backoff(ExponentialBackoff, 0, BASE, None), Duration::ZERO);
    }

    #[test]
    fn test_cap_and_saturation() {
        let max = Some(Duration::from_secs(1));
        assert_eq!(
            calculate_backoff(RetryStrategy::ExponentialBackoff, 10, BASE, max),
            Duration::from_secs(1)
        );
        let huge = calculate_backoff(RetryStrategy::ExponentialBackoff, 200, BASE, None);
        assert_eq!(huge, Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_jitter_bounds() {
        let rng = SharedRng::seeded(1);
        for _ in 0..100 {
            let d = apply_jitter(Duration::from_millis(1_000), &rng);
            assert!(d >= Duration::from_millis(1_000));
            assert!(d < Duration::from_millis(1_100));
        }
        assert_eq!(apply_jitter(Duration::from_millis(5), &rng), Duration::from_millis(5));
    }
}
