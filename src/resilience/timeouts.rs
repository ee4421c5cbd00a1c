//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every executor call
//! - Turn a panicking executor into an ordinary transport failure
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct transport errors, retried like any other

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;

use crate::error::TransportError;

/// Run an attempt with a deadline, catching panics.
pub async fn guarded<F, T>(timeout: Duration, attempt: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(attempt).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(panic = %message, "Executor panicked");
            Err(TransportError::new(format!("executor panicked: {message}")))
        }
        Err(_) => Err(TransportError::new(format!(
            "attempt timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
