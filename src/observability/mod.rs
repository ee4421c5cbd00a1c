//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline, queue, breakers, health monitor produce:
//!     → tracing events (structured fields: work_item, pool, target)
//!     → metrics.rs (counters, gauges, histograms)
//!     → snapshot.rs (point-in-time view for operators)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → DeliveryEngine::snapshot()
//! ```

pub mod logging;
pub mod metrics;
pub mod snapshot;
