//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{target::Target, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through targets.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn select(&self, targets: &[Arc<Target>], _key: Option<&str>) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % targets.len();
        Some(targets[index].clone())
    }
}
