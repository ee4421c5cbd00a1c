//! Per-item delivery sequence.
//!
//! # Responsibilities
//! - Gate each attempt through rate limit, breaker and target selection
//! - Run the executor under a deadline with no locks held
//! - Record the outcome into breaker, target counters and metrics
//! - Decide what happens next: done, retry later, or dead-letter
//!
//! # Design Decisions
//! - The pipeline never sleeps; a retry is a [`Disposition`] with a delay
//! - Deferrals (rate limit, open circuit, saturation) do not consume attempts

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use crate::clock::SharedClock;
use crate::config::{RetryConfig, TimeoutConfig};
use crate::error::DeliveryError;
use crate::load_balancer::{PoolRegistry, Target};
use crate::observability::metrics;
use crate::pipeline::executor::Executor;
use crate::resilience::backoff::apply_jitter;
use crate::resilience::{timeouts, CircuitBreaker, RateLimiter, RetryPolicy};
use crate::rng::SharedRng;
use crate::types::{DeadLetterReason, DeliveryOutcome, WorkItem};

/// What the engine should do with an item after one pass.
#[derive(Debug)]
pub enum Disposition {
    Succeeded {
        item: WorkItem,
        outcome: DeliveryOutcome,
    },
    Retry {
        item: WorkItem,
        delay: Duration,
        error: DeliveryError,
        /// Set when the executor ran.
        outcome: Option<DeliveryOutcome>,
    },
    DeadLetter {
        item: WorkItem,
        reason: DeadLetterReason,
        error: DeliveryError,
        outcome: Option<DeliveryOutcome>,
    },
}

impl Disposition {
    pub fn item(&self) -> &WorkItem {
        match self {
            Disposition::Succeeded { item, .. }
            | Disposition::Retry { item, .. }
            | Disposition::DeadLetter { item, .. } => item,
        }
    }

    pub fn outcome(&self) -> Option<&DeliveryOutcome> {
        match self {
            Disposition::Succeeded { outcome, .. } => Some(outcome),
            Disposition::Retry { outcome, .. } | Disposition::DeadLetter { outcome, .. } => {
                outcome.as_ref()
            }
        }
    }
}

pub struct DeliveryPipeline {
    pools: Arc<PoolRegistry>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    executor: Arc<dyn Executor>,
    retry: ArcSwap<RetryPolicy>,
    timeouts: ArcSwap<TimeoutConfig>,
    rng: Arc<SharedRng>,
    clock: SharedClock,
}

impl std::fmt::Debug for DeliveryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPipeline")
            .field("retry", &self.retry.load_full())
            .field("timeouts", &self.timeouts.load_full())
            .finish_non_exhaustive()
    }
}

impl DeliveryPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pools: Arc<PoolRegistry>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        executor: Arc<dyn Executor>,
        retry: &RetryConfig,
        timeouts: TimeoutConfig,
        rng: Arc<SharedRng>,
        clock: SharedClock,
    ) -> Self {
        Self {
            pools,
            breaker,
            limiter,
            executor,
            retry: ArcSwap::from_pointee(RetryPolicy::from(retry)),
            timeouts: ArcSwap::from_pointee(timeouts),
            rng,
            clock,
        }
    }

    pub fn reconfigure(&self, retry: &RetryConfig, timeouts: TimeoutConfig) {
        self.retry.store(Arc::new(RetryPolicy::from(retry)));
        self.timeouts.store(Arc::new(timeouts));
    }

    pub fn retry_policy(&self) -> Arc<RetryPolicy> {
        self.retry.load_full()
    }

    /// Delay used for deferrals that have no better estimate.
    fn deferral_delay(&self, item: &WorkItem) -> Duration {
        let policy = self.retry.load();
        self.jittered(&policy, policy.next_delay(item.attempt_count.max(1)))
    }

    fn jittered(&self, policy: &RetryPolicy, delay: Duration) -> Duration {
        if policy.jitter {
            apply_jitter(delay, &self.rng)
        } else {
            delay
        }
    }

    /// Turn a failed pass into a retry or a dead letter.
    ///
    /// Errors that are not retryable dead-letter immediately. Errors that
    /// consumed an attempt follow the retry policy. Everything else is a
    /// deferral that waits `delay`, or the policy delay when none is given.
    fn settle(
        &self,
        item: WorkItem,
        error: DeliveryError,
        delay: Option<Duration>,
        outcome: Option<DeliveryOutcome>,
    ) -> Disposition {
        if !error.is_retryable() {
            let reason = match error {
                DeliveryError::Expired => DeadLetterReason::Expired,
                _ => DeadLetterReason::NoHealthyTarget,
            };
            return Disposition::DeadLetter {
                item,
                reason,
                error,
                outcome,
            };
        }

        if error.counts_as_attempt() {
            let policy = self.retry.load();
            let max_attempts = item.max_attempts.unwrap_or(policy.max_attempts);
            if !policy.should_retry(item.attempt_count, max_attempts) {
                return Disposition::DeadLetter {
                    item,
                    reason: DeadLetterReason::MaxAttemptsExceeded,
                    error,
                    outcome,
                };
            }
            let delay = self.jittered(&policy, policy.next_delay(item.attempt_count));
            tracing::debug!(
                work_item_id = %item.id,
                attempt = item.attempt_count,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Delivery failed, retry scheduled"
            );
            return Disposition::Retry {
                item,
                delay,
                error,
                outcome,
            };
        }

        let delay = delay.unwrap_or_else(|| self.deferral_delay(&item));
        tracing::debug!(
            work_item_id = %item.id,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Delivery deferred"
        );
        Disposition::Retry {
            item,
            delay,
            error,
            outcome,
        }
    }

    /// Run one pass of the delivery sequence for `item`.
    pub async fn deliver(&self, mut item: WorkItem) -> Disposition {
        if item.is_expired(self.clock.now()) {
            return self.settle(item, DeliveryError::Expired, None, None);
        }

        // 1. Rate limit
        let subject = item.subject().to_string();
        if !self.limiter.try_acquire(&subject) {
            return self.settle(item, DeliveryError::RateLimited { subject }, None, None);
        }

        // 2. Pool and health
        let Some(pool) = self.pools.get(&item.pool) else {
            let error = DeliveryError::NoHealthyTarget(item.pool.clone());
            return self.settle(item, error, None, None);
        };
        let healthy = pool.healthy_targets();
        if healthy.is_empty() {
            tracing::warn!(pool = %pool.name, work_item_id = %item.id, "No healthy targets");
            let error = DeliveryError::NoHealthyTarget(pool.name.clone());
            return self.settle(item, error, None, None);
        }

        // 3. Breaker
        let (available, blocked): (Vec<Arc<Target>>, Vec<Arc<Target>>) = healthy
            .into_iter()
            .partition(|t| self.breaker.is_available(&t.key()));
        if available.is_empty() {
            metrics::record_circuit_open(&pool.name);
            let retry_in = blocked
                .iter()
                .filter_map(|t| self.breaker.remaining_open(&t.key()))
                .min();
            let delay = retry_in.unwrap_or_else(|| self.deferral_delay(&item));
            let error = DeliveryError::CircuitOpen {
                pool: pool.name.clone(),
                retry_in: delay,
            };
            return self.settle(item, error, Some(delay), None);
        }

        // 4. Target selection
        let candidates: Vec<Arc<Target>> =
            available.into_iter().filter(|t| t.has_capacity()).collect();
        let Some(target) = pool.select(&candidates, item.affinity_key.as_deref()) else {
            let error = DeliveryError::Saturated {
                pool: pool.name.clone(),
            };
            return self.settle(item, error, None, None);
        };

        let key = target.key();
        if !self.breaker.allow(&key) {
            let delay = self
                .breaker
                .remaining_open(&key)
                .unwrap_or_else(|| self.deferral_delay(&item));
            let error = DeliveryError::CircuitOpen {
                pool: pool.name.clone(),
                retry_in: delay,
            };
            return self.settle(item, error, Some(delay), None);
        }

        let Some(guard) = target.try_acquire() else {
            self.breaker.release_probe(&key);
            let error = DeliveryError::Saturated {
                pool: pool.name.clone(),
            };
            return self.settle(item, error, None, None);
        };

        // 5. Attempt
        item.attempt_count += 1;
        let timeout = self.timeouts.load().attempt();
        tracing::debug!(
            work_item_id = %item.id,
            pool = %pool.name,
            target_name = %target.name,
            attempt = item.attempt_count,
            "Attempting delivery"
        );

        let started = Instant::now();
        // The call itself runs inside the guarded future so a panic in
        // `execute` is caught as well as one in the returned future.
        let attempt = async { self.executor.execute(target.clone(), &item).await };
        let result = timeouts::guarded(timeout, attempt).await;
        let duration = started.elapsed();
        drop(guard);

        // 6. Outcome
        let success = result.is_ok();
        target.record_outcome(success, duration);
        metrics::record_attempt(&pool.name, &target.name, success, duration);

        match result {
            Ok(response) => {
                self.breaker.record_success(&key);
                tracing::debug!(
                    work_item_id = %item.id,
                    target_name = %target.name,
                    duration_ms = duration.as_millis() as u64,
                    "Delivery succeeded"
                );
                let outcome = DeliveryOutcome {
                    success: true,
                    duration,
                    status_code: response.status_code,
                    error: None,
                    target: target.name.clone(),
                };
                Disposition::Succeeded { item, outcome }
            }
            Err(source) => {
                self.breaker.record_failure(&key, &source.message);
                let outcome = DeliveryOutcome {
                    success: false,
                    duration,
                    status_code: source.status_code,
                    error: Some(source.message.clone()),
                    target: target.name.clone(),
                };
                let error = DeliveryError::TransportFailure {
                    target: target.name.clone(),
                    source,
                };
                self.settle(item, error, None, Some(outcome))
            }
        }
    }
}
