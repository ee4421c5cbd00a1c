//! Delivery queue subsystem.
//!
//! # Data Flow
//! ```text
//! submit → priority.rs (validate size/capacity, stamp TTL, push to level FIFO)
//!     → worker: next() → dequeue (purge expired → dead_letter.rs) → pipeline
//!     → retry: timer task → requeue (full → dead_letter.rs)
//!     → exhausted / no targets → dead_letter.rs
//! ```

pub mod dead_letter;
pub mod priority;

pub use dead_letter::{DeadLetterStore, InMemoryDeadLetterStore};
pub use priority::{PriorityDeliveryQueue, QueueHealth, QueueStats};
