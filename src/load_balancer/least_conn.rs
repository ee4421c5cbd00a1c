//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{target::Target, LoadBalancer};

/// Least connections selector.
/// Selects the target with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn select(&self, targets: &[Arc<Target>], _key: Option<&str>) -> Option<Arc<Target>> {
        // In case of tie, the first one is selected (stability)
        targets
            .iter()
            .min_by_key(|t| t.active_connections())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::target;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let t1 = target("a", 1);
        let t2 = target("b", 1);

        t1.inc_connections();
        let targets = vec![t1.clone(), t2.clone()];

        assert_eq!(lb.select(&targets, None).unwrap().name, "b");

        t2.inc_connections();
        t2.inc_connections();
        assert_eq!(lb.select(&targets, None).unwrap().name, "a");
    }
}
