//! Delivery pipeline.
//!
//! # Data Flow
//! ```text
//! WorkItem (from a worker)
//!     → delivery.rs: expired? → rate limit → pool health → breaker
//!         → load balancer → connection guard
//!     → executor.rs: Executor::execute under timeouts::guarded
//!     → outcome recorded → Disposition { Succeeded | Retry | DeadLetter }
//! ```

pub mod delivery;
pub mod executor;

pub use delivery::{DeliveryPipeline, Disposition};
pub use executor::{executor_fn, AttemptResponse, Executor, ExecutorFn, HttpExecutor};
