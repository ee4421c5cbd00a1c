//! Work items, dead-letter records, and delivery events.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery priority. Higher levels are always served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 5,
    High = 8,
    Critical = 10,
}

impl Priority {
    /// All levels, highest first.
    pub const DESCENDING: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of outbound work.
///
/// Time fields are monotonic and therefore not serialized.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub id: Uuid,
    /// Target pool this item is delivered to.
    pub pool: String,
    /// Rate-limit subject. Defaults to the pool name.
    pub subject: Option<String>,
    /// Key used by hash balancing to pin an item to a target.
    pub affinity_key: Option<String>,
    pub priority: Priority,
    pub payload: serde_json::Value,
    /// Stamped by the queue on first enqueue.
    #[serde(skip)]
    pub enqueued_at: Option<Instant>,
    /// Absolute deadline. Resolved from `ttl` on first enqueue when unset.
    #[serde(skip)]
    pub expires_at: Option<Instant>,
    #[serde(skip)]
    pub ttl: Option<Duration>,
    /// Executor attempts made so far.
    pub attempt_count: u32,
    /// Resolved from the retry config at submission when unset.
    pub max_attempts: Option<u32>,
}

impl WorkItem {
    pub fn new(pool: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool: pool.into(),
            subject: None,
            affinity_key: None,
            priority: Priority::default(),
            payload,
            enqueued_at: None,
            expires_at: None,
            ttl: None,
            attempt_count: 0,
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_affinity_key(mut self, key: impl Into<String>) -> Self {
        self.affinity_key = Some(key.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_deadline(mut self, expires_at: Instant) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Subject used for rate limiting.
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or(&self.pool)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// External submission format (one JSON object per line on the daemon's stdin).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitRequest {
    pub pool: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    pub subject: Option<String>,
    pub affinity_key: Option<String>,
    pub ttl_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl From<SubmitRequest> for WorkItem {
    fn from(req: SubmitRequest) -> Self {
        let mut item = WorkItem::new(req.pool, req.payload).with_priority(req.priority);
        item.subject = req.subject;
        item.affinity_key = req.affinity_key;
        item.ttl = req.ttl_secs.map(Duration::from_secs);
        item.max_attempts = req.max_attempts;
        item
    }
}

/// Why an item left the live queue for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    MaxAttemptsExceeded,
    NoHealthyTarget,
    Expired,
    RetryQueueFull,
}

impl DeadLetterReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeadLetterReason::MaxAttemptsExceeded => "max attempts exceeded",
            DeadLetterReason::NoHealthyTarget => "no healthy targets",
            DeadLetterReason::Expired => "expired",
            DeadLetterReason::RetryQueueFull => "queue full on retry",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal record of an undeliverable item. Written once.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterRecord {
    pub item: WorkItem,
    pub reason: DeadLetterReason,
    pub last_error: Option<String>,
    pub moved_at: SystemTime,
}

impl DeadLetterRecord {
    pub fn new(item: WorkItem, reason: DeadLetterReason, last_error: Option<String>) -> Self {
        Self {
            item,
            reason,
            last_error,
            moved_at: SystemTime::now(),
        }
    }
}

/// Result of a single executor attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub duration: Duration,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub target: String,
}

/// State reported on the outcome stream after each pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Succeeded,
    RetryScheduled,
    DeadLettered,
}

/// Message published on the outcome stream.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryEvent {
    pub work_item_id: Uuid,
    pub pool: String,
    pub state: DeliveryState,
    pub target: Option<String>,
    pub attempt: u32,
    pub error: Option<String>,
    pub reason: Option<DeadLetterReason>,
    pub retry_in: Option<Duration>,
}

impl DeliveryEvent {
    pub fn succeeded(item: &WorkItem, target: &str) -> Self {
        Self {
            work_item_id: item.id,
            pool: item.pool.clone(),
            state: DeliveryState::Succeeded,
            target: Some(target.to_string()),
            attempt: item.attempt_count,
            error: None,
            reason: None,
            retry_in: None,
        }
    }

    pub fn retry_scheduled(
        item: &WorkItem,
        target: Option<&str>,
        error: String,
        retry_in: Duration,
    ) -> Self {
        Self {
            work_item_id: item.id,
            pool: item.pool.clone(),
            state: DeliveryState::RetryScheduled,
            target: target.map(str::to_string),
            attempt: item.attempt_count,
            error: Some(error),
            reason: None,
            retry_in: Some(retry_in),
        }
    }

    pub fn dead_lettered(record: &DeadLetterRecord, target: Option<&str>) -> Self {
        Self {
            work_item_id: record.item.id,
            pool: record.item.pool.clone(),
            state: DeliveryState::DeadLettered,
            target: target.map(str::to_string),
            attempt: record.item.attempt_count,
            error: record.last_error.clone(),
            reason: Some(record.reason),
            retry_in: None,
        }
    }

    /// True for the expiry notification emitted by the queue.
    pub fn is_expiry(&self) -> bool {
        self.reason == Some(DeadLetterReason::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::High.level(), 8);
    }

    #[test]
    fn test_subject_defaults_to_pool() {
        let item = WorkItem::new("webhooks", json!({}));
        assert_eq!(item.subject(), "webhooks");
        let item = item.with_subject("partner-42");
        assert_eq!(item.subject(), "partner-42");
    }

    #[test]
    fn test_submit_request_defaults() {
        let req: SubmitRequest =
            serde_json::from_str(r#"{"pool": "hooks", "priority": "high", "ttl_secs": 30}"#).unwrap();
        let item = WorkItem::from(req);
        assert_eq!(item.pool, "hooks");
        assert_eq!(item.priority, Priority::High);
        assert_eq!(item.ttl, Some(Duration::from_secs(30)));
        assert!(item.payload.is_null());
        assert!(item.max_attempts.is_none());
    }

    #[test]
    fn test_expiry() {
        let now = Instant::now();
        let item = WorkItem::new("p", json!(null)).with_deadline(now);
        assert!(item.is_expired(now));
        assert!(!WorkItem::new("p", json!(null)).is_expired(now));
    }
}
