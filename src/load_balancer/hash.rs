//! Affinity-key hashing strategy.
//!
//! Items carrying the same affinity key land on the same target while the
//! candidate set is unchanged. Items without a key fall back to round-robin.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::load_balancer::{round_robin::RoundRobin, target::Target, LoadBalancer};

#[derive(Debug, Default)]
pub struct KeyHash {
    fallback: RoundRobin,
}

impl KeyHash {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for KeyHash {
    fn select(&self, targets: &[Arc<Target>], key: Option<&str>) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }
        let Some(key) = key else {
            return self.fallback.select(targets, None);
        };

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % targets.len() as u64) as usize;
        Some(targets[index].clone())
    }
}
