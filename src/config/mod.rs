//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated)
//!     → DeliveryEngine::new / DeliveryEngine::apply_config
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → sent over channel, engine swaps component configs (ArcSwap)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Invalid reloads are logged and dropped; the running config stays

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BalancingStrategy, BreakerConfig, EngineConfig, HealthCheckConfig, LogFormat,
    ObservabilityConfig, PoolConfig, QueueConfig, RateLimitConfig, RetryConfig, RetryStrategy,
    TargetConfig, TimeoutConfig, WindowLimits, WorkerConfig,
};
