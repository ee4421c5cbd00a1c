//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the delivery engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool and outcome stream settings.
    pub engine: WorkerConfig,

    /// Upstream target pools.
    pub pools: Vec<PoolConfig>,

    /// Circuit breaker settings (applied per target).
    pub breaker: BreakerConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Delivery queue configuration.
    pub queue: QueueConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Find a pool definition by name.
    pub fn pool(&self, name: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.name == name)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent delivery workers.
    pub workers: usize,

    /// Capacity of the outcome event broadcast channel.
    pub event_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            event_buffer: 1024,
        }
    }
}

/// Target selection strategy for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    Random,
    LeastConnections,
    /// Stable hash of the work item's affinity key.
    Hash,
}

/// A named group of interchangeable upstream targets.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Pool identifier referenced by work items.
    pub name: String,

    /// Load balancing algorithm.
    #[serde(default)]
    pub strategy: BalancingStrategy,

    /// Targets in this pool.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Unique target identifier within its pool.
    pub name: String,

    /// Target address (e.g., "http://127.0.0.1:3000/hooks").
    pub address: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum concurrent attempts against this target.
    #[serde(default = "default_max_target_conns")]
    pub max_connections: usize,

    /// Initial health. Unhealthy targets are excluded from selection.
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_max_target_conns() -> usize {
    100
}

fn default_healthy() -> bool {
    true
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Enable circuit breaking.
    pub enabled: bool,

    /// Consecutive failures before the circuit opens. Zero opens on the first failure.
    pub failure_threshold: u32,

    /// Time an open circuit waits before letting a probe through, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

/// Limits for the three fixed windows. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WindowLimits {
    pub per_minute: Option<u32>,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Limits applied to subjects without an override.
    pub default: WindowLimits,

    /// Per-subject overrides keyed by subject name.
    pub subjects: HashMap<String, WindowLimits>,
}

impl RateLimitConfig {
    /// Effective limits for a subject.
    pub fn limits_for(&self, subject: &str) -> WindowLimits {
        self.subjects.get(subject).copied().unwrap_or(self.default)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default: WindowLimits {
                per_minute: Some(60),
                per_hour: Some(3600),
                per_day: None,
            },
            subjects: HashMap::new(),
        }
    }
}

/// Delivery queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending items across all priorities.
    pub max_size: usize,

    /// Maximum serialized payload size in bytes (0 = unlimited).
    pub max_payload_bytes: usize,

    /// TTL applied to items submitted without one, in seconds (0 = none).
    pub default_ttl_secs: u64,

    /// Dead-letter records retained before the oldest are evicted.
    pub max_dead_letters: usize,
}

impl QueueConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_payload_bytes: 1024 * 1024, // 1MB
            default_ttl_secs: 24 * 60 * 60,
            max_dead_letters: 10_000,
        }
    }
}

/// Backoff shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    FixedDelay,
    LinearBackoff,
    #[default]
    ExponentialBackoff,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff strategy.
    pub strategy: RetryStrategy,

    /// Maximum number of delivery attempts per work item.
    pub max_attempts: u32,

    /// Base delay in milliseconds.
    pub base_delay_ms: u64,

    /// Cap on any single delay in milliseconds (0 = uncapped).
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::ExponentialBackoff,
            max_attempts: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            jitter: false,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a single executor call in milliseconds.
    pub attempt_ms: u64,
}

impl TimeoutConfig {
    pub fn attempt(&self) -> Duration {
        Duration::from_millis(self.attempt_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { attempt_ms: 30_000 }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path appended to the target address by the HTTP probe.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [[pools]]
            name = "webhooks"
            strategy = "weighted_round_robin"

            [[pools.targets]]
            name = "a"
            address = "http://127.0.0.1:9000"
            weight = 3

            [rate_limit.subjects.partner]
            per_minute = 2
            "#,
        )
        .unwrap();

        let pool = config.pool("webhooks").unwrap();
        assert_eq!(pool.strategy, BalancingStrategy::WeightedRoundRobin);
        assert_eq!(pool.targets[0].weight, 3);
        assert_eq!(pool.targets[0].max_connections, 100);
        assert!(pool.targets[0].healthy);
        assert_eq!(config.retries.max_attempts, 3);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.rate_limit.limits_for("partner").per_minute, Some(2));
        assert_eq!(config.rate_limit.limits_for("partner").per_hour, None);
        assert_eq!(config.rate_limit.limits_for("other").per_minute, Some(60));
    }

    #[test]
    fn test_zero_ttl_disables_default() {
        let queue = QueueConfig {
            default_ttl_secs: 0,
            ..QueueConfig::default()
        };
        assert!(queue.default_ttl().is_none());
    }
}
