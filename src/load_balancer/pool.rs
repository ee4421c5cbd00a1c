//! Target pool management.
//!
//! # Responsibilities
//! - Manage collections of targets grouped by pool name
//! - Apply load balancing algorithms to select targets
//! - Reconcile pools against reloaded configuration
//! - Report aggregate pool health

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::{BalancingStrategy, PoolConfig, TargetConfig};
use crate::load_balancer::{build, target::Target, LoadBalancer};
use crate::rng::SharedRng;

/// Aggregate health of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    /// Every target is healthy.
    Healthy,
    /// At least half of the targets are healthy.
    Degraded,
    /// Fewer than half of the targets are healthy.
    Unhealthy,
    NoTargets,
}

#[derive(Debug)]
struct Balancer {
    strategy: BalancingStrategy,
    inner: Box<dyn LoadBalancer>,
}

/// A named group of interchangeable targets.
#[derive(Debug)]
pub struct TargetPool {
    pub name: String,
    targets: ArcSwap<Vec<Arc<Target>>>,
    balancer: ArcSwap<Balancer>,
    /// Serializes membership changes; readers never take it.
    writer: Mutex<()>,
    rng: Arc<SharedRng>,
}

impl TargetPool {
    pub fn new(config: &PoolConfig, rng: Arc<SharedRng>) -> Self {
        let targets = config
            .targets
            .iter()
            .map(|t| Arc::new(Target::new(&config.name, t)))
            .collect();
        Self {
            name: config.name.clone(),
            targets: ArcSwap::from_pointee(targets),
            balancer: ArcSwap::from_pointee(Balancer {
                strategy: config.strategy,
                inner: build(config.strategy, rng.clone()),
            }),
            writer: Mutex::new(()),
            rng,
        }
    }

    /// All targets, healthy or not.
    pub fn targets(&self) -> Arc<Vec<Arc<Target>>> {
        self.targets.load_full()
    }

    pub fn target(&self, name: &str) -> Option<Arc<Target>> {
        self.targets.load().iter().find(|t| t.name == name).cloned()
    }

    pub fn healthy_targets(&self) -> Vec<Arc<Target>> {
        self.targets
            .load()
            .iter()
            .filter(|t| t.is_healthy())
            .cloned()
            .collect()
    }

    pub fn strategy(&self) -> BalancingStrategy {
        self.balancer.load().strategy
    }

    /// Swap the balancing algorithm. Cursor state of the old one is dropped.
    pub fn set_strategy(&self, strategy: BalancingStrategy) {
        if self.strategy() == strategy {
            return;
        }
        self.balancer.store(Arc::new(Balancer {
            strategy,
            inner: build(strategy, self.rng.clone()),
        }));
        tracing::info!(pool = %self.name, ?strategy, "Balancing strategy changed");
    }

    /// Run the pool's strategy over an already filtered candidate list.
    pub fn select(&self, candidates: &[Arc<Target>], key: Option<&str>) -> Option<Arc<Target>> {
        self.balancer.load().inner.select(candidates, key)
    }

    /// Add a target. Returns `false` if the name is already taken.
    pub fn add_target(&self, config: &TargetConfig) -> bool {
        let _guard = self.writer.lock().expect("pool writer mutex poisoned");
        let current = self.targets.load();
        if current.iter().any(|t| t.name == config.name) {
            return false;
        }
        let mut next = current.as_ref().clone();
        next.push(Arc::new(Target::new(&self.name, config)));
        self.targets.store(Arc::new(next));
        tracing::info!(pool = %self.name, target_name = %config.name, "Target added");
        true
    }

    /// Remove a target by name. In-flight guards keep the old `Arc` alive.
    pub fn remove_target(&self, name: &str) -> Option<Arc<Target>> {
        let _guard = self.writer.lock().expect("pool writer mutex poisoned");
        let current = self.targets.load();
        let removed = current.iter().find(|t| t.name == name).cloned()?;
        let next: Vec<_> = current.iter().filter(|t| t.name != name).cloned().collect();
        self.targets.store(Arc::new(next));
        tracing::info!(pool = %self.name, target_name = %name, "Target removed");
        Some(removed)
    }

    /// Bring membership, weights and strategy in line with `config`.
    /// Returns the breaker keys of targets that left the pool or were
    /// replaced because their address changed.
    pub fn reconcile(&self, config: &PoolConfig) -> Vec<String> {
        self.set_strategy(config.strategy);

        let _guard = self.writer.lock().expect("pool writer mutex poisoned");
        let current = self.targets.load();

        let next: Vec<Arc<Target>> = config
            .targets
            .iter()
            .map(|tc| match current.iter().find(|t| t.name == tc.name) {
                Some(existing) if existing.address == tc.address => {
                    existing.apply_config(tc);
                    existing.clone()
                }
                _ => Arc::new(Target::new(&self.name, tc)),
            })
            .collect();

        // Anything not carried over into `next` is gone or replaced.
        let removed = current
            .iter()
            .filter(|t| !next.iter().any(|n| Arc::ptr_eq(n, t)))
            .map(|t| t.key())
            .collect();

        self.targets.store(Arc::new(next));
        removed
    }

    pub fn health(&self) -> PoolHealth {
        let targets = self.targets.load();
        if targets.is_empty() {
            return PoolHealth::NoTargets;
        }
        let healthy = targets.iter().filter(|t| t.is_healthy()).count();
        if healthy == targets.len() {
            PoolHealth::Healthy
        } else if healthy * 2 >= targets.len() {
            PoolHealth::Degraded
        } else {
            PoolHealth::Unhealthy
        }
    }
}

/// All pools known to the engine, keyed by name.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: DashMap<String, Arc<TargetPool>>,
    rng: Arc<SharedRng>,
}

impl PoolRegistry {
    pub fn new(configs: &[PoolConfig], rng: Arc<SharedRng>) -> Self {
        let pools = DashMap::new();
        for config in configs {
            pools.insert(
                config.name.clone(),
                Arc::new(TargetPool::new(config, rng.clone())),
            );
        }
        Self { pools, rng }
    }

    pub fn get(&self, name: &str) -> Option<Arc<TargetPool>> {
        let pool = self.pools.get(name).map(|p| p.value().clone());
        if pool.is_none() {
            tracing::debug!(pool = %name, "Pool not found in registry");
        }
        pool
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Pools sorted by name.
    pub fn pools(&self) -> Vec<Arc<TargetPool>> {
        let mut pools: Vec<_> = self.pools.iter().map(|p| p.value().clone()).collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        pools
    }

    /// Every target of every pool (for health checking).
    pub fn all_targets(&self) -> Vec<Arc<Target>> {
        self.pools()
            .iter()
            .flat_map(|p| p.targets().as_ref().clone())
            .collect()
    }

    /// Apply a reloaded pool list. Returns breaker keys of departed or replaced targets.
    pub fn reconcile(&self, configs: &[PoolConfig]) -> Vec<String> {
        let mut removed = Vec::new();

        for config in configs {
            match self.get(&config.name) {
                Some(pool) => removed.extend(pool.reconcile(config)),
                None => {
                    tracing::info!(pool = %config.name, "Pool added");
                    self.pools.insert(
                        config.name.clone(),
                        Arc::new(TargetPool::new(config, self.rng.clone())),
                    );
                }
            }
        }

        let wanted: HashSet<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        let stale: Vec<String> = self
            .pools
            .iter()
            .filter(|p| !wanted.contains(p.key().as_str()))
            .map(|p| p.key().clone())
            .collect();
        for name in stale {
            if let Some((_, pool)) = self.pools.remove(&name) {
                tracing::info!(pool = %name, "Pool removed");
                removed.extend(pool.targets().iter().map(|t| t.key()));
            }
        }

        removed
    }
}
