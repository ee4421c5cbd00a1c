//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};

use delivery_engine::config::{
    BalancingStrategy, EngineConfig, PoolConfig, RetryConfig, RetryStrategy, TargetConfig,
};
use delivery_engine::load_balancer::Target;
use delivery_engine::{
    executor_fn, AttemptResponse, DeliveryEvent, DeliveryState, Executor, TransportError,
};

/// Pool with one target per `(name, weight)` pair.
pub fn pool(name: &str, strategy: BalancingStrategy, targets: &[(&str, u32)]) -> PoolConfig {
    PoolConfig {
        name: name.to_string(),
        strategy,
        targets: targets
            .iter()
            .map(|(target, weight)| TargetConfig {
                name: target.to_string(),
                address: format!("http://{target}.test:8080/hooks"),
                weight: *weight,
                max_connections: 100,
                healthy: true,
            })
            .collect(),
    }
}

/// Config with short fixed retry delays so tests finish quickly.
pub fn config(pools: Vec<PoolConfig>) -> EngineConfig {
    let mut config = EngineConfig {
        pools,
        retries: RetryConfig {
            strategy: RetryStrategy::FixedDelay,
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 0,
            jitter: false,
        },
        ..EngineConfig::default()
    };
    config.engine.workers = 2;
    config.observability.metrics_enabled = false;
    config
}

/// Record of every executor call, in order.
#[derive(Clone, Default)]
pub struct Calls {
    inner: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl Calls {
    /// Record a call and return how many calls `target` had before it.
    fn record(&self, target: &str, payload: &serde_json::Value) -> usize {
        let mut calls = self.inner.lock().unwrap();
        let previous = calls.iter().filter(|(t, _)| t == target).count();
        calls.push((target.to_string(), payload.clone()));
        previous
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn count_for(&self, target: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .count()
    }

    pub fn targets(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }
}

/// Executor whose result is decided per call from the target name and the
/// number of earlier calls to that target.
pub fn scripted<F>(calls: Calls, decide: F) -> impl Executor
where
    F: Fn(&str, usize) -> Result<(), TransportError> + Send + Sync + 'static,
{
    executor_fn(move |target: Arc<Target>, item| {
        let previous = calls.record(&target.name, &item.payload);
        let result = decide(&target.name, previous).map(|_| AttemptResponse::with_status(200));
        async move { result }
    })
}

pub fn always_ok(calls: Calls) -> impl Executor {
    scripted(calls, |_, _| Ok(()))
}

pub fn always_fail(calls: Calls) -> impl Executor {
    scripted(calls, |_, _| Err(TransportError::with_status("upstream error", 500)))
}

/// Fails the first `failures` calls across all targets, then succeeds.
pub fn fail_first(calls: Calls, failures: usize) -> impl Executor {
    let seen = Arc::new(AtomicUsize::new(0));
    scripted(calls, move |_, _| {
        if seen.fetch_add(1, Ordering::SeqCst) < failures {
            Err(TransportError::new("connection reset"))
        } else {
            Ok(())
        }
    })
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn next_event<F>(
    events: &mut broadcast::Receiver<DeliveryEvent>,
    mut pred: F,
) -> DeliveryEvent
where
    F: FnMut(&DeliveryEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Collect `n` terminal (succeeded or dead-lettered) events.
pub async fn terminal_events(
    events: &mut broadcast::Receiver<DeliveryEvent>,
    n: usize,
) -> Vec<DeliveryEvent> {
    let mut collected = Vec::with_capacity(n);
    while collected.len() < n {
        collected.push(
            next_event(events, |e| {
                matches!(e.state, DeliveryState::Succeeded | DeliveryState::DeadLettered)
            })
            .await,
        );
    }
    collected
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// `f` receives the zero-based request number and returns the status and body.
pub async fn start_programmable_backend<F>(f: F) -> SocketAddr
where
    F: Fn(usize) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);
    let requests = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let n = requests.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        read_request(&mut socket).await;
                        let (status, body) = f(n);
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Consume the request head and its `Content-Length` body.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= head_end + 4 + content_length {
            return;
        }
    }
}
