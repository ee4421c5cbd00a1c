//! Transport seam.
//!
//! The engine never talks to a network itself; an [`Executor`] performs the
//! actual call against the selected target.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use url::Url;

use crate::error::TransportError;
use crate::load_balancer::Target;
use crate::types::WorkItem;

/// What a successful attempt reports back.
#[derive(Debug, Clone, Default)]
pub struct AttemptResponse {
    pub status_code: Option<u16>,
}

impl AttemptResponse {
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
        }
    }
}

/// Performs one delivery attempt.
///
/// The returned future must not borrow `item`; implementations clone what
/// they need. Timeouts and panics are handled by the caller.
pub trait Executor: Send + Sync + 'static {
    fn execute(
        &self,
        target: Arc<Target>,
        item: &WorkItem,
    ) -> BoxFuture<'static, Result<AttemptResponse, TransportError>>;
}

/// Adapter turning an async closure into an [`Executor`].
pub struct ExecutorFn<F>(F);

pub fn executor_fn<F, Fut>(f: F) -> ExecutorFn<F>
where
    F: Fn(Arc<Target>, WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AttemptResponse, TransportError>> + Send + 'static,
{
    ExecutorFn(f)
}

impl<F, Fut> Executor for ExecutorFn<F>
where
    F: Fn(Arc<Target>, WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AttemptResponse, TransportError>> + Send + 'static,
{
    fn execute(
        &self,
        target: Arc<Target>,
        item: &WorkItem,
    ) -> BoxFuture<'static, Result<AttemptResponse, TransportError>> {
        (self.0)(target, item.clone()).boxed()
    }
}

/// POSTs the payload as JSON to the target address.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for HttpExecutor {
    fn execute(
        &self,
        target: Arc<Target>,
        item: &WorkItem,
    ) -> BoxFuture<'static, Result<AttemptResponse, TransportError>> {
        let client = self.client.clone();
        let payload = item.payload.clone();
        let id = item.id.to_string();
        let priority = item.priority.as_str();

        async move {
            let url = Url::parse(&target.address).map_err(|e| {
                TransportError::new(format!("invalid target address '{}': {e}", target.address))
            })?;

            let response = client
                .post(url)
                .header("x-work-item-id", id)
                .header("x-priority", priority)
                .json(&payload)
                .send()
                .await
                .map_err(|e| TransportError::new(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(AttemptResponse::with_status(status.as_u16()))
            } else {
                Err(TransportError::with_status(
                    format!("target responded with {status}"),
                    status.as_u16(),
                ))
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use serde_json::json;

    fn target(address: &str) -> Arc<Target> {
        Arc::new(Target::new(
            "p",
            &TargetConfig {
                name: "t".into(),
                address: address.into(),
                weight: 1,
                max_connections: 1,
                healthy: true,
            },
        ))
    }

    #[tokio::test]
    async fn test_executor_fn_receives_item() {
        let executor = executor_fn(|target: Arc<Target>, item: WorkItem| async move {
            assert_eq!(target.name, "t");
            assert_eq!(item.payload["n"], 1);
            Ok(AttemptResponse::with_status(204))
        });

        let item = WorkItem::new("p", json!({"n": 1}));
        let response = executor.execute(target("http://t"), &item).await.unwrap();
        assert_eq!(response.status_code, Some(204));
    }

    #[tokio::test]
    async fn test_http_executor_rejects_invalid_address() {
        let item = WorkItem::new("p", json!({}));
        let err = HttpExecutor::new()
            .execute(target("not a url"), &item)
            .await
            .unwrap_err();
        assert!(err.message.contains("invalid target address"));
    }
}
