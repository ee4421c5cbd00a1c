//! Delivery engine.
//!
//! # Responsibilities
//! - Own the queue, pipeline, breakers, limiters and pools
//! - Accept submissions and run the worker tasks that drain the queue
//! - Turn pipeline dispositions into events, retries and dead letters
//! - Apply runtime configuration and operator overrides
//!
//! # Design Decisions
//! - Retries are re-enqueued by timer tasks; workers never sleep
//! - `apply_config` swaps component configs in place; the worker count is
//!   fixed at `start`
//! - The handle is cheap to clone; all clones drive the same engine

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::clock::{self, SharedClock};
use crate::config::validation::validate_config;
use crate::config::{ConfigError, EngineConfig, TargetConfig};
use crate::error::{SubmitError, TargetError};
use crate::health::{HealthMonitor, HealthProbe};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{HealthState, PoolRegistry};
use crate::observability::snapshot::EngineSnapshot;
use crate::pipeline::{DeliveryPipeline, Disposition, Executor, HttpExecutor};
use crate::queue::{DeadLetterStore, InMemoryDeadLetterStore, PriorityDeliveryQueue};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::rng::{self, SharedRng};
use crate::types::{DeadLetterRecord, DeliveryEvent, WorkItem};

/// Assembles a [`DeliveryEngine`] with optional injected collaborators.
pub struct EngineBuilder {
    config: EngineConfig,
    executor: Option<Arc<dyn Executor>>,
    clock: Option<SharedClock>,
    rng: Option<Arc<SharedRng>>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
}

impl EngineBuilder {
    pub fn executor(mut self, executor: impl Executor) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn shared_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn rng(mut self, rng: Arc<SharedRng>) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn dead_letter_store(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    pub fn build(self) -> Result<DeliveryEngine, ConfigError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let config = self.config;
        let clock = self.clock.unwrap_or_else(clock::system);
        let rng = self.rng.unwrap_or_else(rng::global);
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(HttpExecutor::new()) as Arc<dyn Executor>);
        let dead_letters = self.dead_letters.unwrap_or_else(|| {
            Arc::new(InMemoryDeadLetterStore::new(config.queue.max_dead_letters))
                as Arc<dyn DeadLetterStore>
        });

        let (events, _) = broadcast::channel(config.engine.event_buffer);
        let pools = Arc::new(PoolRegistry::new(&config.pools, rng.clone()));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone(), clock.clone()));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), clock.clone()));
        let queue = Arc::new(PriorityDeliveryQueue::new(
            config.queue.clone(),
            dead_letters,
            events.clone(),
            clock.clone(),
        ));
        let pipeline = Arc::new(DeliveryPipeline::new(
            pools.clone(),
            breaker.clone(),
            limiter.clone(),
            executor,
            &config.retries,
            config.timeouts.clone(),
            rng,
            clock,
        ));

        tracing::info!(
            pools = config.pools.len(),
            workers = config.engine.workers,
            max_queue_size = config.queue.max_size,
            "Delivery engine built"
        );

        Ok(DeliveryEngine {
            inner: Arc::new(Inner {
                config: ArcSwap::from_pointee(config),
                pools,
                breaker,
                limiter,
                queue,
                pipeline,
                events,
                pending_retries: AtomicUsize::new(0),
            }),
        })
    }
}

struct Inner {
    config: ArcSwap<EngineConfig>,
    pools: Arc<PoolRegistry>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    queue: Arc<PriorityDeliveryQueue>,
    pipeline: Arc<DeliveryPipeline>,
    events: broadcast::Sender<DeliveryEvent>,
    pending_retries: AtomicUsize,
}

#[derive(Clone)]
pub struct DeliveryEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("queued", &self.inner.queue.len())
            .field("pools", &self.inner.pools.pools().len())
            .finish_non_exhaustive()
    }
}

impl DeliveryEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            executor: None,
            clock: None,
            rng: None,
            dead_letters: None,
        }
    }

    /// Engine with the system clock, process RNG and in-memory dead letters.
    pub fn new(config: EngineConfig, executor: impl Executor) -> Result<Self, ConfigError> {
        Self::builder(config).executor(executor).build()
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.inner.config.load_full()
    }

    /// Accept a work item for delivery.
    pub fn submit(&self, mut item: WorkItem) -> Result<Uuid, SubmitError> {
        if !self.inner.pools.contains(&item.pool) {
            return Err(SubmitError::UnknownPool(item.pool));
        }
        if item.max_attempts.is_none() {
            item.max_attempts = Some(self.inner.config.load().retries.max_attempts);
        }
        self.inner.queue.enqueue(item)
    }

    /// Spawn the worker tasks. They exit when `shutdown` fires, after
    /// finishing the item in hand.
    pub fn start(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let workers = self.inner.config.load().engine.workers;
        tracing::info!(workers, "Starting delivery workers");

        (0..workers)
            .map(|worker| {
                let engine = self.clone();
                let mut shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            item = engine.inner.queue.next() => engine.process(item).await,
                            _ = shutdown.recv() => {
                                tracing::debug!(worker, "Worker received shutdown signal, exiting loop");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Run one item through the pipeline and act on the result.
    pub async fn process(&self, item: WorkItem) {
        let disposition = self.inner.pipeline.deliver(item).await;
        if let Some(outcome) = disposition.outcome() {
            self.inner.queue.record_outcome(outcome.success, outcome.duration);
        }

        match disposition {
            Disposition::Succeeded { item, outcome } => {
                tracing::info!(
                    work_item_id = %item.id,
                    pool = %item.pool,
                    target_name = %outcome.target,
                    attempt = item.attempt_count,
                    "Delivered"
                );
                let _ = self
                    .inner
                    .events
                    .send(DeliveryEvent::succeeded(&item, &outcome.target));
            }
            Disposition::Retry {
                item,
                delay,
                error,
                outcome,
            } => {
                let target = outcome.as_ref().map(|o| o.target.as_str());
                let _ = self.inner.events.send(DeliveryEvent::retry_scheduled(
                    &item,
                    target,
                    error.to_string(),
                    delay,
                ));
                self.schedule_retry(item, delay);
            }
            Disposition::DeadLetter {
                item, reason, error, ..
            } => {
                self.inner
                    .queue
                    .move_to_dead_letter(item, reason, Some(error.to_string()));
            }
        }
    }

    fn schedule_retry(&self, item: WorkItem, delay: Duration) {
        let inner = self.inner.clone();
        inner.pending_retries.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.pending_retries.fetch_sub(1, Ordering::Relaxed);
            inner.queue.requeue(item);
        });
    }

    /// Outcome stream. Slow subscribers observe `Lagged` and skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.inner.events.subscribe()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.inner.queue.dead_letters().list()
    }

    /// Move a dead-lettered item back into the queue with a fresh attempt
    /// budget and TTL. The record is restored if the queue rejects it.
    pub fn replay_dead_letter(&self, id: Uuid) -> Result<Uuid, SubmitError> {
        let store = self.inner.queue.dead_letters();
        let record = store.take(id).ok_or(SubmitError::UnknownDeadLetter(id))?;

        let mut item = record.item.clone();
        item.attempt_count = 0;
        item.enqueued_at = None;
        item.expires_at = None;

        match self.submit(item) {
            Ok(id) => {
                tracing::info!(work_item_id = %id, reason = %record.reason, "Dead letter replayed");
                Ok(id)
            }
            Err(e) => {
                store.push(record);
                Err(e)
            }
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot::capture(
            &self.inner.pools,
            &self.inner.breaker,
            &self.inner.limiter,
            &self.inner.queue,
            self.inner.pending_retries.load(Ordering::Relaxed),
        )
    }

    /// Validate and apply a new configuration without restarting.
    pub fn apply_config(&self, config: EngineConfig) -> Result<(), ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let inner = &self.inner;
        inner.breaker.reconfigure(config.breaker.clone());
        inner.limiter.reconfigure(config.rate_limit.clone());
        inner.queue.reconfigure(config.queue.clone());
        inner
            .pipeline
            .reconfigure(&config.retries, config.timeouts.clone());

        for key in inner.pools.reconcile(&config.pools) {
            inner.breaker.remove(&key);
        }

        tracing::info!(pools = config.pools.len(), "Configuration applied");
        inner.config.store(Arc::new(config));
        Ok(())
    }

    pub fn set_target_health(
        &self,
        pool: &str,
        target: &str,
        health: HealthState,
    ) -> Result<(), TargetError> {
        let target = self
            .inner
            .pools
            .get(pool)
            .ok_or_else(|| TargetError::UnknownPool(pool.to_string()))?
            .target(target)
            .ok_or_else(|| TargetError::UnknownTarget {
                pool: pool.to_string(),
                target: target.to_string(),
            })?;
        target.set_health(health);
        tracing::info!(target_key = %target.key(), ?health, "Target health overridden");
        Ok(())
    }

    pub fn add_target(&self, pool: &str, config: TargetConfig) -> Result<(), TargetError> {
        if Url::parse(&config.address).is_err() {
            return Err(TargetError::InvalidAddress {
                target: config.name,
                address: config.address,
            });
        }
        if config.max_connections == 0 {
            return Err(TargetError::ZeroMaxConnections(config.name));
        }
        let target_pool = self
            .inner
            .pools
            .get(pool)
            .ok_or_else(|| TargetError::UnknownPool(pool.to_string()))?;
        if !target_pool.add_target(&config) {
            return Err(TargetError::DuplicateTarget {
                pool: pool.to_string(),
                target: config.name,
            });
        }
        Ok(())
    }

    pub fn remove_target(&self, pool: &str, target: &str) -> Result<(), TargetError> {
        let removed = self
            .inner
            .pools
            .get(pool)
            .ok_or_else(|| TargetError::UnknownPool(pool.to_string()))?
            .remove_target(target)
            .ok_or_else(|| TargetError::UnknownTarget {
                pool: pool.to_string(),
                target: target.to_string(),
            })?;
        self.inner.breaker.remove(&removed.key());
        Ok(())
    }

    /// Force a target's breaker back to Closed.
    pub fn reset_breaker(&self, pool: &str, target: &str) {
        self.inner.breaker.reset(&format!("{pool}/{target}"));
    }

    /// Drop every pending item. Returns how many were removed.
    pub fn purge_queue(&self) -> usize {
        self.inner.queue.purge()
    }

    /// Active health monitor over this engine's pools, using the current
    /// `health_check` settings.
    pub fn health_monitor(&self, probe: Arc<dyn HealthProbe>) -> HealthMonitor {
        HealthMonitor::new(
            self.inner.pools.clone(),
            self.inner.config.load().health_check.clone(),
            probe,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BalancingStrategy, PoolConfig, RetryConfig, RetryStrategy};
    use crate::error::TransportError;
    use crate::load_balancer::Target;
    use crate::pipeline::{executor_fn, AttemptResponse};
    use crate::resilience::CircuitState;
    use crate::types::{DeadLetterReason, SubmitRequest};
    use serde_json::json;

    fn config() -> EngineConfig {
        EngineConfig {
            pools: vec![PoolConfig {
                name: "hooks".into(),
                strategy: BalancingStrategy::RoundRobin,
                targets: vec![TargetConfig {
                    name: "a".into(),
                    address: "http://a.internal".into(),
                    weight: 1,
                    max_connections: 10,
                    healthy: true,
                }],
            }],
            retries: RetryConfig {
                strategy: RetryStrategy::FixedDelay,
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 0,
                jitter: false,
            },
            ..EngineConfig::default()
        }
    }

    fn failing_engine() -> DeliveryEngine {
        DeliveryEngine::new(
            config(),
            executor_fn(|_t: Arc<Target>, _i: WorkItem| async {
                Err::<AttemptResponse, _>(TransportError::new("refused"))
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_submit_unknown_pool() {
        let engine = failing_engine();
        let err = engine.submit(WorkItem::new("nope", json!({}))).unwrap_err();
        assert_eq!(err, SubmitError::UnknownPool("nope".into()));
    }

    #[test]
    fn test_submit_applies_default_max_attempts() {
        let engine = failing_engine();
        engine.submit(WorkItem::new("hooks", json!({}))).unwrap();
        let item = engine.inner.queue.dequeue().unwrap();
        assert_eq!(item.max_attempts, Some(1));
    }

    #[tokio::test]
    async fn test_replay_dead_letter() {
        let engine = failing_engine();
        let id = engine.submit(WorkItem::new("hooks", json!({}))).unwrap();
        let item = engine.inner.queue.dequeue().unwrap();
        engine.process(item).await;

        let letters = engine.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::MaxAttemptsExceeded);

        assert_eq!(engine.replay_dead_letter(id).unwrap(), id);
        assert!(engine.dead_letters().is_empty());
        let replayed = engine.inner.queue.dequeue().unwrap();
        assert_eq!(replayed.attempt_count, 0);

        assert_eq!(
            engine.replay_dead_letter(id),
            Err(SubmitError::UnknownDeadLetter(id))
        );
    }

    #[test]
    fn test_target_management() {
        let engine = failing_engine();
        let extra = TargetConfig {
            name: "b".into(),
            address: "http://b.internal".into(),
            weight: 1,
            max_connections: 10,
            healthy: true,
        };
        engine.add_target("hooks", extra.clone()).unwrap();
        assert!(matches!(
            engine.add_target("hooks", extra),
            Err(TargetError::DuplicateTarget { .. })
        ));

        engine
            .set_target_health("hooks", "b", HealthState::Unhealthy)
            .unwrap();
        let snapshot = engine.snapshot();
        let pool = snapshot.pool("hooks").unwrap();
        assert_eq!(pool.target("b").unwrap().health, HealthState::Unhealthy);

        engine.remove_target("hooks", "b").unwrap();
        assert!(matches!(
            engine.remove_target("hooks", "b"),
            Err(TargetError::UnknownTarget { .. })
        ));
        assert!(matches!(
            engine.set_target_health("nope", "a", HealthState::Healthy),
            Err(TargetError::UnknownPool(_))
        ));
    }

    #[test]
    fn test_submit_with_maximum_ttl_has_no_deadline() {
        let engine = failing_engine();
        let request: SubmitRequest = serde_json::from_value(json!({
            "pool": "hooks",
            "payload": {"k": "v"},
            "ttl_secs": u64::MAX,
        }))
        .unwrap();
        engine.submit(request.into()).unwrap();

        let item = engine.inner.queue.dequeue().unwrap();
        assert!(item.expires_at.is_none());
    }

    #[test]
    fn test_add_target_rejects_zero_connections() {
        let engine = failing_engine();
        let target = TargetConfig {
            name: "b".into(),
            address: "http://b.internal".into(),
            weight: 1,
            max_connections: 0,
            healthy: true,
        };
        assert_eq!(
            engine.add_target("hooks", target),
            Err(TargetError::ZeroMaxConnections("b".into()))
        );
        assert!(engine.snapshot().pool("hooks").unwrap().target("b").is_none());
    }

    #[test]
    fn test_address_change_resets_breaker() {
        let mut cfg = config();
        cfg.breaker.enabled = true;
        cfg.breaker.failure_threshold = 1;
        let engine = DeliveryEngine::new(
            cfg.clone(),
            executor_fn(|_t: Arc<Target>, _i: WorkItem| async {
                Ok::<_, TransportError>(AttemptResponse::with_status(200))
            }),
        )
        .unwrap();

        engine.inner.breaker.record_failure("hooks/a", "boom");
        assert_eq!(engine.inner.breaker.state("hooks/a"), CircuitState::Open);

        cfg.pools[0].targets[0].address = "http://a-moved.internal".into();
        engine.apply_config(cfg).unwrap();

        let snapshot = engine.snapshot();
        let target = snapshot.pool("hooks").unwrap().target("a").unwrap();
        assert_eq!(target.address, "http://a-moved.internal");
        assert_eq!(target.breaker.state, CircuitState::Closed);
    }

    #[test]
    fn test_apply_config_rejects_invalid() {
        let engine = failing_engine();
        let mut bad = config();
        bad.engine.workers = 0;
        assert!(matches!(
            engine.apply_config(bad),
            Err(ConfigError::Validation(_))
        ));
    }
}
