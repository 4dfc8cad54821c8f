//! Mock work queue for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::queue::{Delivery, Notification, QueueError, WorkQueue};

/// In-memory implementation of the `WorkQueue` trait.
///
/// Provides controllable behavior for testing:
/// - Records every published notification for assertions
/// - Manual redelivery of un-acked messages (instead of a timer)
/// - Error injection
///
/// # Example
///
/// ```rust,ignore
/// let queue = MockWorkQueue::new("upload");
/// queue.publish(&Notification::new("t1", "v1")).await?;
///
/// let published = queue.published().await;
/// assert_eq!(published.len(), 1);
///
/// let delivery = queue.consume().await?.unwrap();
/// queue.ack(delivery.id).await?;
/// ```
#[derive(Debug)]
pub struct MockWorkQueue {
    name: String,
    /// Every notification ever published, in order.
    published: Arc<RwLock<Vec<Notification>>>,
    /// Deliverable messages.
    pending: Arc<RwLock<VecDeque<(i64, Notification)>>>,
    /// Consumed but not yet acked.
    in_flight: Arc<RwLock<HashMap<i64, Notification>>>,
    /// Delivery counts per message, surviving redelivery.
    delivery_counts: Arc<RwLock<HashMap<i64, u32>>>,
    /// If set, the next operation fails with this error.
    next_error: Arc<RwLock<Option<QueueError>>>,
    /// Counter for message IDs.
    next_id: Arc<RwLock<i64>>,
}

impl MockWorkQueue {
    /// Create a new mock queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            published: Arc::new(RwLock::new(Vec::new())),
            pending: Arc::new(RwLock::new(VecDeque::new())),
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            delivery_counts: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
            next_id: Arc::new(RwLock::new(0)),
        }
    }

    /// All notifications published so far.
    pub async fn published(&self) -> Vec<Notification> {
        self.published.read().await.clone()
    }

    /// Clear the published record.
    pub async fn clear_published(&self) {
        self.published.write().await.clear();
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: QueueError) {
        *self.next_error.write().await = Some(error);
    }

    /// Return all un-acked in-flight messages to the deliverable pool,
    /// standing in for the visibility timeout.
    pub async fn redeliver_unacked(&self) {
        let mut in_flight = self.in_flight.write().await;
        let mut pending = self.pending.write().await;
        let mut ids: Vec<i64> = in_flight.keys().copied().collect();
        ids.sort_unstable();
        for id in ids.into_iter().rev() {
            if let Some(notification) = in_flight.remove(&id) {
                pending.push_front((id, notification));
            }
        }
    }

    async fn take_error(&self) -> Option<QueueError> {
        self.next_error.write().await.take()
    }
}

#[async_trait]
impl WorkQueue for MockWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, notification: &Notification) -> Result<u64, QueueError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        self.published.write().await.push(notification.clone());

        let id = {
            let mut next = self.next_id.write().await;
            *next += 1;
            *next
        };
        let mut pending = self.pending.write().await;
        pending.push_back((id, notification.clone()));
        Ok((pending.len() + self.in_flight.read().await.len()) as u64)
    }

    async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        let Some((id, notification)) = self.pending.write().await.pop_front() else {
            return Ok(None);
        };

        self.in_flight.write().await.insert(id, notification.clone());
        let delivery_count = {
            let mut counts = self.delivery_counts.write().await;
            let count = counts.entry(id).or_insert(0);
            *count += 1;
            *count
        };

        Ok(Some(Delivery {
            id,
            queue: self.name.clone(),
            notification,
            delivery_count,
        }))
    }

    async fn ack(&self, delivery_id: i64) -> Result<(), QueueError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        self.in_flight.write().await.remove(&delivery_id);
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        Ok((self.pending.read().await.len() + self.in_flight.read().await.len()) as u64)
    }
}
