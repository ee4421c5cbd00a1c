//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check pool and target identity (unique names, parseable addresses)
//! - Validate value ranges (workers > 0, timeouts > 0, weights ≥ 1, connections ≥ 1)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::EngineConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("pool name must not be empty")]
    EmptyPoolName,

    #[error("duplicate pool '{0}'")]
    DuplicatePool(String),

    #[error("duplicate target '{target}' in pool '{pool}'")]
    DuplicateTarget { pool: String, target: String },

    #[error("target '{target}' in pool '{pool}' has invalid address '{address}'")]
    InvalidAddress {
        pool: String,
        target: String,
        address: String,
    },

    #[error("target '{target}' in pool '{pool}' must have weight >= 1")]
    InvalidWeight { pool: String, target: String },

    #[error("target '{target}' in pool '{pool}' must allow at least one connection")]
    ZeroMaxConnections { pool: String, target: String },

    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),
}

/// Validate an engine configuration, collecting every error.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.engine.workers == 0 {
        errors.push(ValidationError::Zero { field: "engine.workers" });
    }
    if config.engine.event_buffer == 0 {
        errors.push(ValidationError::Zero { field: "engine.event_buffer" });
    }
    if config.queue.max_size == 0 {
        errors.push(ValidationError::Zero { field: "queue.max_size" });
    }
    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::Zero { field: "retries.max_attempts" });
    }
    if config.timeouts.attempt_ms == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.attempt_ms" });
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::Zero { field: "health_check.interval_secs" });
        }
        if config.health_check.unhealthy_threshold == 0 {
            errors.push(ValidationError::Zero { field: "health_check.unhealthy_threshold" });
        }
        if config.health_check.healthy_threshold == 0 {
            errors.push(ValidationError::Zero { field: "health_check.healthy_threshold" });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let mut pool_names = HashSet::new();
    for pool in &config.pools {
        if pool.name.trim().is_empty() {
            errors.push(ValidationError::EmptyPoolName);
        } else if !pool_names.insert(pool.name.as_str()) {
            errors.push(ValidationError::DuplicatePool(pool.name.clone()));
        }

        let mut target_names = HashSet::new();
        for target in &pool.targets {
            if !target_names.insert(target.name.as_str()) {
                errors.push(ValidationError::DuplicateTarget {
                    pool: pool.name.clone(),
                    target: target.name.clone(),
                });
            }
            if Url::parse(&target.address).is_err() {
                errors.push(ValidationError::InvalidAddress {
                    pool: pool.name.clone(),
                    target: target.name.clone(),
                    address: target.address.clone(),
                });
            }
            if target.weight == 0 {
                errors.push(ValidationError::InvalidWeight {
                    pool: pool.name.clone(),
                    target: target.name.clone(),
                });
            }
            if target.max_connections == 0 {
                errors.push(ValidationError::ZeroMaxConnections {
                    pool: pool.name.clone(),
                    target: target.name.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
