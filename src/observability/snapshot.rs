//! Point-in-time view of the whole engine, for operators and health endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::config::BalancingStrategy;
use crate::load_balancer::{HealthState, PoolHealth, PoolRegistry, TargetStats};
use crate::queue::{PriorityDeliveryQueue, QueueHealth, QueueStats};
use crate::resilience::{CircuitBreaker, CircuitBreakerSnapshot, RateLimitSnapshot, RateLimiter};
use crate::types::Priority;

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub pools: Vec<PoolSnapshot>,
    /// Limiter usage keyed by subject.
    pub rate_limits: BTreeMap<String, RateLimitSnapshot>,
    pub queue: QueueSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub strategy: BalancingStrategy,
    pub health: PoolHealth,
    pub targets: Vec<TargetSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSnapshot {
    pub name: String,
    pub address: String,
    pub weight: u32,
    pub health: HealthState,
    pub breaker: CircuitBreakerSnapshot,
    pub active_connections: usize,
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub depths: BTreeMap<Priority, usize>,
    pub total: usize,
    pub health: QueueHealth,
    pub stats: QueueStats,
    pub dead_letters: usize,
    /// Retries waiting on their timer, not yet back in the queue.
    pub pending_retries: usize,
}

impl EngineSnapshot {
    pub fn capture(
        pools: &PoolRegistry,
        breaker: &CircuitBreaker,
        limiter: &RateLimiter,
        queue: &PriorityDeliveryQueue,
        pending_retries: usize,
    ) -> Self {
        let pools = pools
            .pools()
            .iter()
            .map(|pool| PoolSnapshot {
                name: pool.name.clone(),
                strategy: pool.strategy(),
                health: pool.health(),
                targets: pool
                    .targets()
                    .iter()
                    .map(|target| {
                        let TargetStats {
                            successes,
                            failures,
                            average_latency,
                        } = target.stats();
                        TargetSnapshot {
                            name: target.name.clone(),
                            address: target.address.clone(),
                            weight: target.weight(),
                            health: target.health(),
                            breaker: breaker.snapshot(&target.key()),
                            active_connections: target.active_connections(),
                            successes,
                            failures,
                            average_latency,
                        }
                    })
                    .collect(),
            })
            .collect();

        let depths = queue.depths();
        Self {
            pools,
            rate_limits: limiter.snapshot(),
            queue: QueueSnapshot {
                total: depths.values().sum(),
                depths,
                health: queue.health(),
                stats: queue.stats(),
                dead_letters: queue.dead_letters().len(),
                pending_retries,
            },
        }
    }

    pub fn pool(&self, name: &str) -> Option<&PoolSnapshot> {
        self.pools.iter().find(|p| p.name == name)
    }
}

impl PoolSnapshot {
    pub fn target(&self, name: &str) -> Option<&TargetSnapshot> {
        self.targets.iter().find(|t| t.name == name)
    }
}
