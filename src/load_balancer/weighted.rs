//! Weighted load balancing strategy.
//!
//! Draws an integer in `[1, total_weight]` and walks the cumulative weights,
//! so a target with weight `w` is chosen with probability `w / total`.

use std::sync::Arc;

use crate::load_balancer::{target::Target, LoadBalancer};
use crate::rng::SharedRng;

#[derive(Debug)]
pub struct WeightedRandom {
    rng: Arc<SharedRng>,
}

impl WeightedRandom {
    pub fn new(rng: Arc<SharedRng>) -> Self {
        Self { rng }
    }
}

impl LoadBalancer for WeightedRandom {
    fn select(&self, targets: &[Arc<Target>], _key: Option<&str>) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }

        let total: u64 = targets.iter().map(|t| t.weight() as u64).sum();
        if total == 0 {
            return targets.first().cloned();
        }

        let mut point = self.rng.gen_inclusive(1, total);
        for target in targets {
            let weight = target.weight() as u64;
            if point <= weight {
                return Some(target.clone());
            }
            point -= weight;
        }
        targets.last().cloned()
    }
}
