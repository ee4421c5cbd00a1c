//! Target abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream endpoint
//! - Track active connections (for Least Connections LB)
//! - Enforce max connection limits
//! - Track health state (Unknown/Healthy/Unhealthy)
//! - Accumulate delivery counters for the snapshot

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::TargetConfig;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Delivery counters for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStats {
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Duration,
}

/// A single upstream endpoint.
#[derive(Debug)]
pub struct Target {
    /// Pool this target belongs to.
    pub pool: String,
    /// Name, unique within the pool.
    pub name: String,
    /// Address handed to the executor.
    pub address: String,

    weight: AtomicU32,
    max_connections: AtomicUsize,
    active_connections: AtomicUsize,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    /// Last `healthy` flag seen in configuration.
    configured_healthy: AtomicBool,

    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
}

impl Target {
    pub fn new(pool: impl Into<String>, config: &TargetConfig) -> Self {
        let state = if config.healthy {
            HealthState::Unknown
        } else {
            HealthState::Unhealthy
        };
        Self {
            pool: pool.into(),
            name: config.name.clone(),
            address: config.address.clone(),
            weight: AtomicU32::new(config.weight.max(1)),
            max_connections: AtomicUsize::new(config.max_connections),
            active_connections: AtomicUsize::new(0),
            state: AtomicU8::new(state as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            configured_healthy: AtomicBool::new(config.healthy),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
        }
    }

    /// Apply a reloaded target config in place.
    ///
    /// Health is only overridden when the configured flag itself changed, so a
    /// reload does not clobber the result of active health checks.
    pub fn apply_config(&self, config: &TargetConfig) {
        self.set_weight(config.weight);
        self.set_max_connections(config.max_connections);
        let previous = self.configured_healthy.swap(config.healthy, Ordering::Relaxed);
        if previous != config.healthy {
            self.set_health(if config.healthy {
                HealthState::Unknown
            } else {
                HealthState::Unhealthy
            });
        }
    }

    /// Registry key used by the circuit breaker: `pool/name`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.pool, self.name)
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight.max(1), Ordering::Relaxed);
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections.load(Ordering::Relaxed)
    }

    pub fn set_max_connections(&self, max: usize) {
        self.max_connections.store(max, Ordering::Relaxed);
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn has_capacity(&self) -> bool {
        self.active_connections() < self.max_connections()
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count.
    pub fn dec_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Try to create a connection guard that increments count.
    pub fn try_acquire(self: &Arc<Self>) -> Option<TargetGuard> {
        let max = self.max_connections();
        let mut prev = self.active_connections.load(Ordering::Relaxed);
        loop {
            if prev >= max {
                return None;
            }
            match self.active_connections.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(TargetGuard {
            target: self.clone(),
        })
    }

    // --- Health Logic ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Return true if target is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }

    /// Operator/config override. Resets the hysteresis counters.
    pub fn set_health(&self, state: HealthState) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Report a successful health check. Returns the new state on transition.
    pub fn mark_success(&self, healthy_threshold: usize) -> Option<HealthState> {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Healthy {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            return Some(HealthState::Healthy);
        }
        None
    }

    /// Report a failed health check. Returns the new state on transition.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> Option<HealthState> {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Unhealthy {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            return Some(HealthState::Unhealthy);
        }
        None
    }

    // --- Delivery counters ---

    pub fn record_outcome(&self, success: bool, latency: Duration) {
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TargetStats {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let total = successes + failures;
        let average_latency = if total == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_latency_us.load(Ordering::Relaxed) / total)
        };
        TargetStats {
            successes,
            failures,
            average_latency,
        }
    }
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct TargetGuard {
    pub target: Arc<Target>,
}

impl Deref for TargetGuard {
    type Target = Target;
    fn deref(&self) -> &Self::Target {
        &self.target
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        self.target.dec_connections();
    }
}
