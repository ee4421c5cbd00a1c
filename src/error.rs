//! Error taxonomy for submission and delivery.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Failure reported by an executor for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// Upstream status code, when the transport has one.
    pub status_code: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
        }
    }
}

/// Why a delivery attempt did not succeed.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Subject exceeded one of its windows. Transient.
    #[error("rate limit exceeded for subject '{subject}'")]
    RateLimited { subject: String },

    /// Every healthy target is behind an open breaker. Transient.
    #[error("circuit open for pool '{pool}', retry in {retry_in:?}")]
    CircuitOpen { pool: String, retry_in: Duration },

    /// Every available target is at its connection limit. Transient.
    #[error("all available targets in pool '{pool}' are at max connections")]
    Saturated { pool: String },

    /// The pool has no healthy targets (or no longer exists). Not retried.
    #[error("no healthy targets in pool '{0}'")]
    NoHealthyTarget(String),

    /// The executor failed. Retried per policy.
    #[error("transport failure via '{target}': {source}")]
    TransportFailure {
        target: String,
        #[source]
        source: TransportError,
    },

    /// TTL elapsed before delivery. Never retried.
    #[error("work item expired before delivery")]
    Expired,
}

impl DeliveryError {
    /// Whether the pipeline may schedule another attempt for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::RateLimited { .. }
                | DeliveryError::CircuitOpen { .. }
                | DeliveryError::Saturated { .. }
                | DeliveryError::TransportFailure { .. }
        )
    }

    /// Whether this error consumed one of the item's attempts.
    pub fn counts_as_attempt(&self) -> bool {
        matches!(self, DeliveryError::TransportFailure { .. })
    }
}

/// Rejection returned synchronously by `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("queue is full (max size {max_size})")]
    QueueFull { max_size: usize },

    #[error("payload of {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("unknown pool '{0}'")]
    UnknownPool(String),

    /// Replay asked for a record the dead-letter store does not hold.
    #[error("no dead-letter record for work item {0}")]
    UnknownDeadLetter(Uuid),
}

/// Rejection of a runtime pool membership or health change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("unknown pool '{0}'")]
    UnknownPool(String),

    #[error("pool '{pool}' has no target '{target}'")]
    UnknownTarget { pool: String, target: String },

    #[error("pool '{pool}' already has a target '{target}'")]
    DuplicateTarget { pool: String, target: String },

    #[error("invalid address '{address}' for target '{target}'")]
    InvalidAddress { target: String, address: String },

    #[error("target '{0}' must allow at least one connection")]
    ZeroMaxConnections(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let transport = DeliveryError::TransportFailure {
            target: "a".into(),
            source: TransportError::with_status("bad gateway", 502),
        };
        assert!(transport.is_retryable());
        assert!(transport.counts_as_attempt());
        assert_eq!(transport.to_string(), "transport failure via 'a': bad gateway");

        let limited = DeliveryError::RateLimited { subject: "s".into() };
        assert!(limited.is_retryable());
        assert!(!limited.counts_as_attempt());

        assert!(!DeliveryError::NoHealthyTarget("p".into()).is_retryable());
        assert!(!DeliveryError::Expired.is_retryable());
    }
}
