//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe targets
//! - Update target health state based on results

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::load_balancer::{HealthState, PoolRegistry, Target};
use crate::observability::metrics;

/// Decides whether a target is currently reachable.
pub trait HealthProbe: Send + Sync + 'static {
    fn check(&self, target: Arc<Target>) -> BoxFuture<'static, bool>;
}

/// GETs `address + path` and treats any 2xx as healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            path: path.into(),
        }
    }
}

impl HealthProbe for HttpProbe {
    fn check(&self, target: Arc<Target>) -> BoxFuture<'static, bool> {
        let client = self.client.clone();
        let uri = format!("{}{}", target.address.trim_end_matches('/'), self.path);

        async move {
            match client
                .get(&uri)
                .header("user-agent", "delivery-engine-health-check")
                .send()
                .await
            {
                Ok(response) => {
                    let success = response.status().is_success();
                    if !success {
                        tracing::warn!(uri = %uri, status = %response.status(), "Health check failed: non-success status");
                    }
                    success
                }
                Err(e) => {
                    tracing::warn!(uri = %uri, error = %e, "Health check failed: connection error");
                    false
                }
            }
        }
        .boxed()
    }
}

pub struct HealthMonitor {
    pools: Arc<PoolRegistry>,
    config: HealthCheckConfig,
    probe: Arc<dyn HealthProbe>,
}

impl HealthMonitor {
    pub fn new(
        pools: Arc<PoolRegistry>,
        config: HealthCheckConfig,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            pools,
            config,
            probe,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every target once.
    pub async fn check_all(&self) {
        let timeout = Duration::from_secs(self.config.timeout_secs);

        for target in self.pools.all_targets() {
            let healthy = match time::timeout(timeout, self.probe.check(target.clone())).await {
                Ok(healthy) => healthy,
                Err(_) => {
                    tracing::warn!(target_key = %target.key(), "Health check failed: timeout");
                    false
                }
            };

            let transition = if healthy {
                target.mark_success(self.config.healthy_threshold as usize)
            } else {
                target.mark_failure(self.config.unhealthy_threshold as usize)
            };

            match transition {
                Some(HealthState::Healthy) => {
                    tracing::info!(target_key = %target.key(), "Target marked healthy")
                }
                Some(HealthState::Unhealthy) => {
                    tracing::warn!(target_key = %target.key(), "Target marked unhealthy")
                }
                _ => {}
            }

            metrics::record_target_health(&target.key(), target.is_healthy());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BalancingStrategy, PoolConfig, TargetConfig};
    use crate::rng::SharedRng;

    /// Fails every target whose name starts with "down".
    struct NamePrefixProbe;

    impl HealthProbe for NamePrefixProbe {
        fn check(&self, target: Arc<Target>) -> BoxFuture<'static, bool> {
            let healthy = !target.name.starts_with("down");
            async move { healthy }.boxed()
        }
    }

    fn registry() -> Arc<PoolRegistry> {
        let targets = ["up", "down"]
            .iter()
            .map(|name| TargetConfig {
                name: (*name).into(),
                address: format!("http://{name}.internal"),
                weight: 1,
                max_connections: 1,
                healthy: true,
            })
            .collect();
        Arc::new(PoolRegistry::new(
            &[PoolConfig {
                name: "p".into(),
                strategy: BalancingStrategy::RoundRobin,
                targets,
            }],
            Arc::new(SharedRng::seeded(1)),
        ))
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            unhealthy_threshold: 2,
            healthy_threshold: 1,
            ..HealthCheckConfig::default()
        }
    }

    #[tokio::test]
    async fn test_threshold_marks_unhealthy() {
        let pools = registry();
        let monitor = HealthMonitor::new(pools.clone(), config(), Arc::new(NamePrefixProbe));
        let pool = pools.get("p").unwrap();

        monitor.check_all().await;
        assert!(pool.target("down").unwrap().is_healthy());

        monitor.check_all().await;
        assert!(!pool.target("down").unwrap().is_healthy());
        assert_eq!(pool.target("up").unwrap().health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let monitor = HealthMonitor::new(registry(), config(), Arc::new(NamePrefixProbe));
        let handle = tokio::spawn(monitor.run(rx));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
