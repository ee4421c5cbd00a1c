//! Delivery & Resilience Engine
//!
//! Reliable outbound delivery of work items to pools of interchangeable
//! upstream targets.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                    DELIVERY ENGINE                       │
//!                 │                                                          │
//!   submit(item)  │  ┌──────────────┐   worker   ┌──────────────────────┐    │
//!   ──────────────┼─▶│    queue     │───────────▶│      pipeline        │    │
//!                 │  │ priority+TTL │            │ rate limit → breaker │    │
//!                 │  └──────┬───────┘            │ → load_balancer      │    │
//!                 │         │  ▲ retry timer     └──────────┬───────────┘    │
//!                 │         │  └────────────────────────────┤                │
//!                 │         ▼                               ▼                │
//!                 │  ┌──────────────┐            ┌──────────────────────┐    │   Target
//!                 │  │ dead letters │◀───────────│  Executor (timeout)  │────┼──▶ (pool)
//!                 │  └──────────────┘  exhausted └──────────────────────┘    │
//!                 │                                                          │
//!                 │  Cross-cutting: config (hot reload), health checks,      │
//!                 │  observability (tracing, metrics, snapshot), lifecycle   │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

// Core
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod types;

// Traffic management
pub mod health;
pub mod load_balancer;
pub mod resilience;

// Cross-cutting concerns
pub mod clock;
pub mod lifecycle;
pub mod observability;
pub mod rng;

pub use config::EngineConfig;
pub use engine::{DeliveryEngine, EngineBuilder};
pub use error::{DeliveryError, SubmitError, TargetError, TransportError};
pub use lifecycle::Shutdown;
pub use pipeline::{executor_fn, AttemptResponse, Executor, HttpExecutor};
pub use types::{DeadLetterReason, DeliveryEvent, DeliveryState, Priority, SubmitRequest, WorkItem};
