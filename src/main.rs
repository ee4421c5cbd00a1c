//! `delivery-engine` daemon.
//!
//! Reads newline-delimited JSON submit requests from stdin, delivers them to
//! the configured pools over HTTP, and logs every outcome event.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use delivery_engine::config::watcher::ConfigWatcher;
use delivery_engine::config::{load_config, EngineConfig};
use delivery_engine::health::HttpProbe;
use delivery_engine::lifecycle::signals::spawn_signal_handler;
use delivery_engine::observability::logging;
use delivery_engine::observability::metrics::init_metrics;
use delivery_engine::{DeliveryEngine, HttpExecutor, Shutdown, SubmitRequest, WorkItem};

#[derive(Parser)]
#[command(name = "delivery-engine")]
#[command(about = "Priority delivery queue with retries, circuit breaking and load balancing", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes.
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("delivery-engine v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        pools = config.pools.len(),
        workers = config.engine.workers,
        max_queue_size = config.queue.max_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let engine = DeliveryEngine::new(config.clone(), HttpExecutor::new())?;
    let shutdown = Shutdown::new();
    let mut stopped = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    let workers = engine.start(&shutdown);

    let probe = Arc::new(HttpProbe::new(config.health_check.path.clone()));
    let monitor = tokio::spawn(engine.health_monitor(probe).run(shutdown.subscribe()));

    tokio::spawn(log_events(engine.clone(), shutdown.clone()));

    // Keep the watcher alive for the lifetime of the process.
    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let engine = engine.clone();
            tokio::spawn(async move {
                while let Some(new_config) = updates.recv().await {
                    if let Err(e) = engine.apply_config(new_config) {
                        tracing::error!(error = %e, "Rejected reloaded configuration");
                    }
                }
            });
            Some(handle)
        }
        _ => None,
    };

    tokio::spawn(read_submissions(engine.clone(), shutdown.clone()));

    let _ = stopped.recv().await;
    tracing::info!("Waiting for workers to finish in-flight deliveries");
    for worker in workers {
        let _ = worker.await;
    }
    let _ = monitor.await;

    let snapshot = engine.snapshot();
    tracing::info!(
        pending = snapshot.queue.total,
        pending_retries = snapshot.queue.pending_retries,
        dead_letters = snapshot.queue.dead_letters,
        "Shutdown complete"
    );
    Ok(())
}

async fn read_submissions(engine: DeliveryEngine, shutdown: Shutdown) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stop = shutdown.subscribe();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = stop.recv() => break,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed, no further submissions");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<SubmitRequest>(&line) {
            Ok(request) => match engine.submit(WorkItem::from(request)) {
                Ok(id) => tracing::debug!(work_item_id = %id, "Submission accepted"),
                Err(e) => tracing::warn!(error = %e, "Submission rejected"),
            },
            Err(e) => tracing::warn!(error = %e, "Malformed submission"),
        }
    }
}

async fn log_events(engine: DeliveryEngine, shutdown: Shutdown) {
    let mut events = engine.subscribe();
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = %json, "Delivery event"),
                    Err(e) => tracing::error!(error = %e, "Failed to serialize event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = stop.recv() => break,
        }
    }
}
