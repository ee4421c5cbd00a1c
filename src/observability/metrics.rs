//! Metrics collection and exposition.
//!
//! # Metrics
//! - `delivery_attempts_total` (counter): executor attempts by pool, target, result
//! - `delivery_attempt_duration_seconds` (histogram): executor latency
//! - `delivery_rate_limited_total` (counter): limiter rejections by subject
//! - `delivery_circuit_open_total` (counter): attempts deferred by open breakers
//! - `delivery_dead_letters_total` (counter): dead-lettered items by reason
//! - `delivery_expired_total` (counter): items discarded by TTL, by priority
//! - `delivery_queue_depth` (gauge): pending items by priority
//! - `delivery_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `delivery_target_health` (gauge): 1=healthy, 0=unhealthy
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing unless they call [`init_metrics`].

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;
use crate::types::{DeadLetterReason, Priority};

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_attempt(pool: &str, target: &str, success: bool, duration: Duration) {
    let result = if success { "success" } else { "failure" };
    counter!(
        "delivery_attempts_total",
        "pool" => pool.to_string(),
        "target" => target.to_string(),
        "result" => result
    )
    .increment(1);
    histogram!(
        "delivery_attempt_duration_seconds",
        "pool" => pool.to_string(),
        "target" => target.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_rate_limited(subject: &str) {
    counter!("delivery_rate_limited_total", "subject" => subject.to_string()).increment(1);
}

pub fn record_circuit_open(pool: &str) {
    counter!("delivery_circuit_open_total", "pool" => pool.to_string()).increment(1);
}

pub fn record_dead_letter(reason: DeadLetterReason) {
    counter!("delivery_dead_letters_total", "reason" => reason.as_str()).increment(1);
}

pub fn record_expired(priority: Priority) {
    counter!("delivery_expired_total", "priority" => priority.as_str()).increment(1);
}

pub fn record_queue_depth(priority: Priority, depth: usize) {
    gauge!("delivery_queue_depth", "priority" => priority.as_str()).set(depth as f64);
}

pub fn record_breaker_state(target: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("delivery_breaker_state", "target" => target.to_string()).set(value);
}

pub fn record_target_health(target: &str, healthy: bool) {
    gauge!("delivery_target_health", "target" => target.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
