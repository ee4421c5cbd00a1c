//! Dead-letter storage.
//!
//! Terminal resting place for undeliverable items. The default store is
//! bounded and in memory.

use std::collections::VecDeque;
use std::sync::Mutex;

use uuid::Uuid;

use crate::types::DeadLetterRecord;

pub trait DeadLetterStore: Send + Sync + std::fmt::Debug {
    fn push(&self, record: DeadLetterRecord);

    /// Records oldest first.
    fn list(&self) -> Vec<DeadLetterRecord>;

    /// Remove and return the record for `id`, for replay.
    fn take(&self, id: Uuid) -> Option<DeadLetterRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-memory store. When full, the oldest record is evicted.
#[derive(Debug)]
pub struct InMemoryDeadLetterStore {
    records: Mutex<VecDeque<DeadLetterRecord>>,
    capacity: usize,
}

impl InMemoryDeadLetterStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

impl DeadLetterStore for InMemoryDeadLetterStore {
    fn push(&self, record: DeadLetterRecord) {
        let mut records = self.records.lock().expect("dead-letter mutex poisoned");
        if records.len() >= self.capacity {
            if let Some(evicted) = records.pop_front() {
                tracing::warn!(
                    work_item_id = %evicted.item.id,
                    capacity = self.capacity,
                    "Dead-letter store full, evicting oldest record"
                );
            }
        }
        records.push_back(record);
    }

    fn list(&self) -> Vec<DeadLetterRecord> {
        let records = self.records.lock().expect("dead-letter mutex poisoned");
        records.iter().cloned().collect()
    }

    fn take(&self, id: Uuid) -> Option<DeadLetterRecord> {
        let mut records = self.records.lock().expect("dead-letter mutex poisoned");
        let index = records.iter().position(|r| r.item.id == id)?;
        records.remove(index)
    }

    fn len(&self) -> usize {
        self.records.lock().expect("dead-letter mutex poisoned").len()
    }
}
