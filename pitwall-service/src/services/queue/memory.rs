//! In-memory implementation of [`EventQueue`].
//!
//! Backs the dev environment and the test suites. Visibility works the same
//! way as on the durable transport: a received message becomes invisible
//! for a default period and reappears (with an incremented receive count)
//! unless it is deleted; `change_visibility` moves the reappearance point.
//! Per-driver FIFO grouping is not enforced here — the store-level lock is
//! the source of truth for per-driver mutual exclusion.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use pitwall_types::events::IngestionJob;

use crate::{
    config::Environment,
    services::queue::{EventQueue, QueueMessage},
};

/// Visibility applied to received messages until the worker decides.
const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

/// Dev/test queue holding messages in process memory.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<Vec<Stored>>>,
    max_batch: usize,
}

struct Stored {
    message_id: String,
    receipt_handle: String,
    body: String,
    receive_count: u32,
    visible_at: Instant,
}

impl MemoryQueue {
    /// Creates an empty queue. Panics outside the dev environment.
    pub fn new(environment: Environment) -> Self {
        environment.assert_is_dev();
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            max_batch: 10,
        }
    }

    /// Number of messages currently stored (visible or not).
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` iff no messages are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn publish(&self, job: &IngestionJob) -> eyre::Result<()> {
        let body = serde_json::to_string(job)?;
        self.inner.lock().push(Stored {
            message_id: Uuid::new_v4().to_string(),
            receipt_handle: String::new(),
            body,
            receive_count: 0,
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn receive(&self) -> eyre::Result<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut batch = Vec::new();
        for stored in inner.iter_mut() {
            if batch.len() == self.max_batch {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            stored.receive_count += 1;
            stored.visible_at = now + DEFAULT_VISIBILITY;
            stored.receipt_handle = Uuid::new_v4().to_string();
            batch.push(QueueMessage {
                message_id: stored.message_id.clone(),
                receipt_handle: stored.receipt_handle.clone(),
                body: stored.body.clone(),
                approximate_receive_count: stored.receive_count.to_string(),
            });
        }
        Ok(batch)
    }

    async fn delete(&self, receipt_handle: &str) -> eyre::Result<()> {
        self.inner
            .lock()
            .retain(|stored| stored.receipt_handle != receipt_handle);
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> eyre::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(stored) = inner
            .iter_mut()
            .find(|stored| stored.receipt_handle == receipt_handle)
        {
            stored.visible_at = Instant::now() + timeout;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_types::DriverId;

    fn job(driver_id: i64) -> IngestionJob {
        IngestionJob {
            driver_id: DriverId::new(driver_id),
            iracing_access_token: "token".to_owned(),
            notify_connection_id: None,
        }
    }

    #[tokio::test]
    async fn received_message_is_invisible_until_timeout() -> eyre::Result<()> {
        let queue = MemoryQueue::new(Environment::Dev);
        queue.publish(&job(1)).await?;
        let batch = queue.receive().await?;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].approximate_receive_count, "1");
        // still leased
        assert!(queue.receive().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn change_visibility_to_zero_redelivers_with_bumped_count() -> eyre::Result<()> {
        let queue = MemoryQueue::new(Environment::Dev);
        queue.publish(&job(1)).await?;
        let batch = queue.receive().await?;
        queue
            .change_visibility(&batch[0].receipt_handle, Duration::ZERO)
            .await?;
        let redelivered = queue.receive().await?;
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].approximate_receive_count, "2");
        Ok(())
    }

    #[tokio::test]
    async fn deleted_message_is_gone() -> eyre::Result<()> {
        let queue = MemoryQueue::new(Environment::Dev);
        queue.publish(&job(1)).await?;
        let batch = queue.receive().await?;
        queue.delete(&batch[0].receipt_handle).await?;
        assert!(queue.is_empty());
        Ok(())
    }
}
