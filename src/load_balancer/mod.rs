//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Work item pool identified
//!     → pool.rs (healthy, non-saturated targets of the pool)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through targets)
//!         - weighted.rs (weighted random / weighted round-robin)
//!         - random.rs (uniform pick)
//!         - least_conn.rs (pick target with fewest connections)
//!         - hash.rs (affinity key → stable target)
//!     → target.rs (acquire connection guard)
//! ```
//!
//! # Design Decisions
//! - Strategies only choose among the candidates they are handed
//! - Filtering (health, breaker, saturation) happens before the strategy runs
//! - Algorithm selection per pool, swappable at runtime

use std::sync::Arc;

use crate::config::BalancingStrategy;
use crate::rng::SharedRng;

pub mod hash;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod round_robin;
pub mod target;
pub mod weighted;

pub use pool::{PoolHealth, PoolRegistry, TargetPool};
pub use target::{HealthState, Target, TargetGuard, TargetStats};

/// Selection algorithm over a pre-filtered candidate list.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick one of `targets`. `key` is the work item's affinity key, if any.
    /// Returns `None` only when `targets` is empty.
    fn select(&self, targets: &[Arc<Target>], key: Option<&str>) -> Option<Arc<Target>>;
}

/// Build the balancer for a configured strategy.
pub fn build(strategy: BalancingStrategy, rng: Arc<SharedRng>) -> Box<dyn LoadBalancer> {
    match strategy {
        BalancingStrategy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        BalancingStrategy::WeightedRoundRobin => Box::new(weighted::WeightedRandom::new(rng)),
        BalancingStrategy::Random => Box::new(random::RandomPick::new(rng)),
        BalancingStrategy::LeastConnections => Box::new(least_conn::LeastConnections::new()),
        BalancingStrategy::Hash => Box::new(hash::KeyHash::new()),
    }
}
