//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Delivery attempt:
//!     → rate_limit.rs (per-subject minute/hour/day windows)
//!     → circuit_breaker.rs (per-target fail-fast, single half-open probe)
//!     → timeouts.rs (deadline + panic guard around the executor)
//!     → On failure: retries.rs / backoff.rs (attempt budget, delay)
//! ```
//!
//! # Design Decisions
//! - Every executor call has a deadline
//! - Rate limiting is checked before the breaker, the breaker before target selection
//! - Breakers and limiters lock per subject; unrelated subjects never contend

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use rate_limit::{RateLimitSnapshot, RateLimiter};
pub use retries::RetryPolicy;
