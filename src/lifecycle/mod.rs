//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → workers finish the item in hand → health monitor exits
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Pending retry timers are not awaited; their items are lost on exit

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
