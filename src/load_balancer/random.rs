//! Uniform random load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{target::Target, LoadBalancer};
use crate::rng::SharedRng;

#[derive(Debug)]
pub struct RandomPick {
    rng: Arc<SharedRng>,
}

impl RandomPick {
    pub fn new(rng: Arc<SharedRng>) -> Self {
        Self { rng }
    }
}

impl LoadBalancer for RandomPick {
    fn select(&self, targets: &[Arc<Target>], _key: Option<&str>) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }
        Some(targets[self.rng.gen_index(targets.len())].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::target;

    #[test]
    fn test_random_covers_all_targets() {
        let lb = RandomPick::new(Arc::new(SharedRng::seeded(42)));
        let targets = vec![target("a", 1), target("b", 1), target("c", 1)];

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(lb.select(&targets, None).unwrap().name.clone());
        }
        assert_eq!(seen.len(), 3);
    }
}
