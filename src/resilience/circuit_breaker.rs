//! Circuit breaker for target protection.
//!
//! # States
//! - Closed: normal operation, attempts pass through
//! - Open: target assumed down, attempts fail fast
//! - Half-Open: a single probe attempt tests whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: after reset timeout (first caller takes the probe)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (opened_at restarts)
//! ```
//!
//! # Design Decisions
//! - Per-target circuit breaker (not global), each behind its own mutex
//! - State is created lazily on the first recorded failure
//! - Single probe in Half-Open: the Open → Half-Open edge and the probe grant
//!   happen under the same lock, so concurrent callers cannot both pass

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::BreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    state: CircuitState,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            state: CircuitState::Closed,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

impl BreakerState {
    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    fn timeout_elapsed(&self, now: Instant, reset_timeout: Duration) -> bool {
        self.opened_at
            .map_or(true, |at| now.saturating_duration_since(at) >= reset_timeout)
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time left before an open circuit admits a probe.
    pub remaining_open: Option<Duration>,
}

/// Registry of per-target breakers.
#[derive(Debug)]
pub struct CircuitBreaker {
    states: DashMap<String, Arc<Mutex<BreakerState>>>,
    config: ArcSwap<BreakerConfig>,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            states: DashMap::new(),
            config: ArcSwap::from_pointee(config),
            clock,
        }
    }

    /// Swap in new thresholds. Existing states keep their counters.
    pub fn reconfigure(&self, config: BreakerConfig) {
        self.config.store(Arc::new(config));
    }

    fn existing(&self, key: &str) -> Option<Arc<Mutex<BreakerState>>> {
        self.states.get(key).map(|entry| entry.value().clone())
    }

    fn existing_or_insert(&self, key: &str) -> Arc<Mutex<BreakerState>> {
        if let Some(state) = self.existing(key) {
            return state;
        }
        self.states
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerState::default())))
            .value()
            .clone()
    }

    /// Decide whether an attempt against `key` may proceed.
    ///
    /// In Half-Open (or on the Open → Half-Open edge) this grants the single
    /// probe; the caller must later record an outcome or call
    /// [`release_probe`](Self::release_probe).
    pub fn allow(&self, key: &str) -> bool {
        let config = self.config.load();
        if !config.enabled {
            return true;
        }
        let Some(state) = self.existing(key) else {
            return true;
        };

        let now = self.clock.now();
        let mut s = state.lock().expect("circuit breaker mutex poisoned");
        match s.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if s.timeout_elapsed(now, config.reset_timeout()) {
                    s.state = CircuitState::HalfOpen;
                    s.probe_in_flight = true;
                    tracing::info!(target_key = %key, "Circuit half-open, admitting probe");
                    metrics::record_breaker_state(key, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if s.probe_in_flight {
                    false
                } else {
                    s.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Non-consuming check: would [`allow`](Self::allow) currently succeed?
    pub fn is_available(&self, key: &str) -> bool {
        let config = self.config.load();
        if !config.enabled {
            return true;
        }
        let Some(state) = self.existing(key) else {
            return true;
        };

        let now = self.clock.now();
        let s = state.lock().expect("circuit breaker mutex poisoned");
        match s.state {
            CircuitState::Closed => true,
            CircuitState::Open => s.timeout_elapsed(now, config.reset_timeout()),
            CircuitState::HalfOpen => !s.probe_in_flight,
        }
    }

    pub fn record_success(&self, key: &str) {
        if !self.config.load().enabled {
            return;
        }
        let Some(state) = self.existing(key) else {
            return;
        };

        let mut s = state.lock().expect("circuit breaker mutex poisoned");
        let previous = s.state;
        s.close();
        if previous != CircuitState::Closed {
            tracing::info!(target_key = %key, from = ?previous, "Circuit closed");
            metrics::record_breaker_state(key, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self, key: &str, error: &str) {
        let config = self.config.load();
        if !config.enabled {
            return;
        }

        let state = self.existing_or_insert(key);
        let now = self.clock.now();
        let mut s = state.lock().expect("circuit breaker mutex poisoned");
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);

        match s.state {
            CircuitState::Closed => {
                if s.consecutive_failures >= config.failure_threshold {
                    s.open(now);
                    tracing::warn!(
                        target_key = %key,
                        failures = s.consecutive_failures,
                        error = %error,
                        "Circuit opened"
                    );
                    metrics::record_breaker_state(key, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                s.open(now);
                tracing::warn!(target_key = %key, error = %error, "Probe failed, circuit re-opened");
                metrics::record_breaker_state(key, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Return an unused probe, e.g. when the attempt was abandoned before
    /// reaching the target.
    pub fn release_probe(&self, key: &str) {
        if let Some(state) = self.existing(key) {
            let mut s = state.lock().expect("circuit breaker mutex poisoned");
            if s.state == CircuitState::HalfOpen {
                s.probe_in_flight = false;
            }
        }
    }

    /// How long an open circuit keeps blocking. `None` when not open.
    pub fn remaining_open(&self, key: &str) -> Option<Duration> {
        let state = self.existing(key)?;
        let reset_timeout = self.config.load().reset_timeout();
        let now = self.clock.now();
        let s = state.lock().expect("circuit breaker mutex poisoned");
        match (s.state, s.opened_at) {
            (CircuitState::Open, Some(at)) => {
                Some(reset_timeout.saturating_sub(now.saturating_duration_since(at)))
            }
            _ => None,
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        self.existing(key)
            .map(|state| state.lock().expect("circuit breaker mutex poisoned").state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, key: &str) -> CircuitBreakerSnapshot {
        let remaining_open = self.remaining_open(key);
        match self.existing(key) {
            Some(state) => {
                let s = state.lock().expect("circuit breaker mutex poisoned");
                CircuitBreakerSnapshot {
                    state: s.state,
                    consecutive_failures: s.consecutive_failures,
                    remaining_open,
                }
            }
            None => CircuitBreakerSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                remaining_open: None,
            },
        }
    }

    /// Operator override: force a breaker back to Closed.
    pub fn reset(&self, key: &str) {
        if let Some(state) = self.existing(key) {
            state.lock().expect("circuit breaker mutex poisoned").close();
            tracing::info!(target_key = %key, "Circuit manually reset");
        }
    }

    /// Drop state for a target that left its pool.
    pub fn remove(&self, key: &str) {
        self.states.remove(key);
    }
}
