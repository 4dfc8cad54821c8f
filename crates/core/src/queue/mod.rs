//! Durable work queues.
//!
//! Queues carry lightweight dispatch notifications between pipeline
//! stages with at-least-once delivery. They are never authoritative for
//! state: the store is. A stalled broker degrades throughput, never
//! correctness, because the reaper repairs any task whose notification
//! was lost.

mod sqlite_queue;
mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use sqlite_queue::SqliteWorkQueue;
pub use types::{Delivery, Notification};

/// Error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Broker/storage error.
    #[error("queue backend error: {0}")]
    Backend(String),

    /// Payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(String),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Payload(e.to_string())
    }
}

/// Trait for work queue backends.
///
/// Delivery is at-least-once: `consume` hides a message for the
/// backend's visibility timeout and bumps its delivery count; a message
/// that is not acked in time becomes deliverable again.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// The queue's name.
    fn name(&self) -> &str;

    /// Append a notification. Returns the queue depth after the publish.
    async fn publish(&self, notification: &Notification) -> Result<u64, QueueError>;

    /// Take the oldest deliverable message, if any. Non-blocking:
    /// consumers poll on their own interval.
    async fn consume(&self) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge (delete) a delivered message.
    async fn ack(&self, delivery_id: i64) -> Result<(), QueueError>;

    /// Current depth: undelivered plus in-flight messages.
    async fn depth(&self) -> Result<u64, QueueError>;
}
