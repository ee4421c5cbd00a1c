//! Priority delivery queue.
//!
//! # Responsibilities
//! - Hold pending work items in one FIFO per priority level
//! - Serve the highest non-empty level first
//! - Purge expired items on every dequeue and dead-letter them
//! - Wake waiting consumers when work arrives
//!
//! # Design Decisions
//! - Strict priority: a steady stream of high-priority work starves lower levels
//! - One mutex over all levels; dead-lettering and event publication happen
//!   after it is released
//! - Capacity is checked for retries too; a full queue dead-letters the retry

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::QueueConfig;
use crate::error::SubmitError;
use crate::observability::metrics;
use crate::queue::dead_letter::DeadLetterStore;
use crate::types::{DeadLetterReason, DeadLetterRecord, DeliveryEvent, Priority, WorkItem};

/// Outcomes recorded before failure ratio is considered.
const DEGRADED_MIN_OUTCOMES: u64 = 100;
/// Failure share above which the queue reports Degraded.
const DEGRADED_FAILURE_RATIO: f64 = 0.10;
/// Fill ratio at which the queue reports Overloaded.
const OVERLOADED_FILL_RATIO: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealth {
    Healthy,
    Degraded,
    Overloaded,
}

/// Lifetime counters of the queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub processed: u64,
    pub failed: u64,
    pub expired: u64,
    pub dead_lettered: u64,
    pub average_processing_time: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
    dead_lettered: AtomicU64,
    processing_us: AtomicU64,
}

#[derive(Debug, Default)]
struct Levels {
    /// Indexed by `slot(priority)`, highest priority first.
    fifos: [VecDeque<WorkItem>; 4],
    len: usize,
}

fn slot(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

impl Levels {
    fn push(&mut self, item: WorkItem) {
        self.fifos[slot(item.priority)].push_back(item);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<WorkItem> {
        let item = self.fifos.iter_mut().find_map(|fifo| fifo.pop_front())?;
        self.len -= 1;
        Some(item)
    }

    fn drain_expired(&mut self, now: std::time::Instant) -> Vec<WorkItem> {
        let mut expired = Vec::new();
        for fifo in self.fifos.iter_mut() {
            if !fifo.iter().any(|item| item.is_expired(now)) {
                continue;
            }
            let (dead, live): (VecDeque<_>, VecDeque<_>) =
                fifo.drain(..).partition(|item| item.is_expired(now));
            *fifo = live;
            expired.extend(dead);
        }
        self.len -= expired.len();
        expired
    }

    fn depth(&self, priority: Priority) -> usize {
        self.fifos[slot(priority)].len()
    }
}

#[derive(Debug)]
pub struct PriorityDeliveryQueue {
    levels: Mutex<Levels>,
    notify: Notify,
    config: ArcSwap<QueueConfig>,
    dead_letters: Arc<dyn DeadLetterStore>,
    events: broadcast::Sender<DeliveryEvent>,
    clock: SharedClock,
    counters: Counters,
}

impl PriorityDeliveryQueue {
    pub fn new(
        config: QueueConfig,
        dead_letters: Arc<dyn DeadLetterStore>,
        events: broadcast::Sender<DeliveryEvent>,
        clock: SharedClock,
    ) -> Self {
        Self {
            levels: Mutex::new(Levels::default()),
            notify: Notify::new(),
            config: ArcSwap::from_pointee(config),
            dead_letters,
            events,
            clock,
            counters: Counters::default(),
        }
    }

    pub fn reconfigure(&self, config: QueueConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn config(&self) -> Arc<QueueConfig> {
        self.config.load_full()
    }

    /// Accept a new item. Stamps `enqueued_at` and resolves `expires_at`.
    pub fn enqueue(&self, mut item: WorkItem) -> Result<Uuid, SubmitError> {
        let config = self.config.load();

        let size = serde_json::to_vec(&item.payload).map_or(0, |bytes| bytes.len());
        if size > config.max_payload_bytes {
            return Err(SubmitError::PayloadTooLarge {
                size,
                max: config.max_payload_bytes,
            });
        }

        let now = self.clock.now();
        if item.enqueued_at.is_none() {
            item.enqueued_at = Some(now);
        }
        if item.expires_at.is_none() {
            // A deadline past the clock's range means the item never expires.
            item.expires_at = item
                .ttl
                .or_else(|| config.default_ttl())
                .and_then(|ttl| now.checked_add(ttl));
        }

        let id = item.id;
        let priority = item.priority;
        let depth = {
            let mut levels = self.levels.lock().expect("queue mutex poisoned");
            if levels.len >= config.max_size {
                return Err(SubmitError::QueueFull {
                    max_size: config.max_size,
                });
            }
            levels.push(item);
            levels.depth(priority)
        };

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::record_queue_depth(priority, depth);
        tracing::debug!(work_item_id = %id, %priority, "Work item enqueued");
        self.notify.notify_one();
        Ok(id)
    }

    /// Put a retried item back. When the queue is full the item is
    /// dead-lettered with `RetryQueueFull` and `false` is returned.
    pub fn requeue(&self, item: WorkItem) -> bool {
        let max_size = self.config.load().max_size;
        let priority = item.priority;

        let rejected = {
            let mut levels = self.levels.lock().expect("queue mutex poisoned");
            if levels.len >= max_size {
                Some(item)
            } else {
                levels.push(item);
                metrics::record_queue_depth(priority, levels.depth(priority));
                None
            }
        };

        match rejected {
            Some(item) => {
                tracing::warn!(work_item_id = %item.id, max_size, "Queue full on retry");
                self.move_to_dead_letter(
                    item,
                    DeadLetterReason::RetryQueueFull,
                    Some(format!("queue is full (max size {max_size})")),
                );
                false
            }
            None => {
                self.notify.notify_one();
                true
            }
        }
    }

    /// Next live item, highest priority first.
    ///
    /// Expired items found anywhere in the queue are dead-lettered first.
    pub fn dequeue(&self) -> Option<WorkItem> {
        let now = self.clock.now();
        let (expired, item) = {
            let mut levels = self.levels.lock().expect("queue mutex poisoned");
            let expired = levels.drain_expired(now);
            let item = levels.pop();
            if !expired.is_empty() {
                for priority in Priority::DESCENDING {
                    metrics::record_queue_depth(priority, levels.depth(priority));
                }
            } else if let Some(item) = &item {
                metrics::record_queue_depth(item.priority, levels.depth(item.priority));
            }
            (expired, item)
        };

        for item in expired {
            self.move_to_dead_letter(item, DeadLetterReason::Expired, None);
        }

        if item.is_some() {
            self.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Wait until an item is available.
    pub async fn next(&self) -> WorkItem {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.dequeue() {
                return item;
            }
            notified.await;
        }
    }

    /// Terminal move: record, store, count and publish.
    pub fn move_to_dead_letter(
        &self,
        item: WorkItem,
        reason: DeadLetterReason,
        error: Option<String>,
    ) -> DeadLetterRecord {
        if reason == DeadLetterReason::Expired {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            metrics::record_expired(item.priority);
            tracing::warn!(work_item_id = %item.id, pool = %item.pool, "Work item expired");
        } else {
            tracing::warn!(
                work_item_id = %item.id,
                pool = %item.pool,
                %reason,
                error = error.as_deref().unwrap_or(""),
                "Work item dead-lettered"
            );
        }

        let record = DeadLetterRecord::new(item, reason, error);
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        metrics::record_dead_letter(reason);
        self.dead_letters.push(record.clone());
        let _ = self.events.send(DeliveryEvent::dead_lettered(&record, None));
        record
    }

    /// Drop every pending item. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let removed = {
            let mut levels = self.levels.lock().expect("queue mutex poisoned");
            let removed = levels.len;
            *levels = Levels::default();
            removed
        };
        for priority in Priority::DESCENDING {
            metrics::record_queue_depth(priority, 0);
        }
        tracing::info!(removed, "Queue purged");
        removed
    }

    pub fn len(&self) -> usize {
        self.levels.lock().expect("queue mutex poisoned").len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depths(&self) -> BTreeMap<Priority, usize> {
        let levels = self.levels.lock().expect("queue mutex poisoned");
        Priority::DESCENDING
            .iter()
            .map(|p| (*p, levels.depth(*p)))
            .collect()
    }

    /// Feed a finished delivery into the processed/failed counters.
    pub fn record_outcome(&self, success: bool, duration: Duration) {
        if success {
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        self.counters.processing_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.counters;
        let processed = c.processed.load(Ordering::Relaxed);
        let failed = c.failed.load(Ordering::Relaxed);
        let outcomes = processed + failed;
        QueueStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            dequeued: c.dequeued.load(Ordering::Relaxed),
            processed,
            failed,
            expired: c.expired.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
            average_processing_time: if outcomes == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(c.processing_us.load(Ordering::Relaxed) / outcomes)
            },
        }
    }

    pub fn health(&self) -> QueueHealth {
        let max_size = self.config.load().max_size;
        if max_size > 0 && self.len() as f64 >= max_size as f64 * OVERLOADED_FILL_RATIO {
            return QueueHealth::Overloaded;
        }

        let processed = self.counters.processed.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);
        let outcomes = processed + failed;
        if outcomes > DEGRADED_MIN_OUTCOMES
            && failed as f64 / outcomes as f64 > DEGRADED_FAILURE_RATIO
        {
            return QueueHealth::Degraded;
        }
        QueueHealth::Healthy
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterStore> {
        &self.dead_letters
    }
}
