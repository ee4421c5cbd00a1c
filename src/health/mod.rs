//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → HealthProbe for each target (with timeout)
//!     → Target::mark_success / mark_failure (hysteresis)
//!
//! Operator overrides:
//!     DeliveryEngine::set_target_health → Target::set_health
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state is per-target; pool health is derived from it
//! - Unhealthy targets are excluded from selection, not removed

pub mod active;

pub use active::{HealthMonitor, HealthProbe, HttpProbe};
