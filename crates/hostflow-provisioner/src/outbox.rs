//! Outbox relay
//!
//! Tasks are written to the store in the same write as their resource row
//! and only then handed to the queue. A crash between the two leaves an
//! undispatched entry that the relay picks up on its next pass.

use crate::error::Result;
use crate::queue::TaskQueue;
use crate::store::ResourceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct OutboxRelay {
    store: Arc<dyn ResourceStore>,
    queue: Arc<dyn TaskQueue>,
    interval: Duration,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn ResourceStore>, queue: Arc<dyn TaskQueue>, interval: Duration) -> Self {
        Self {
            store,
            queue,
            interval,
        }
    }

    /// Enqueue every undispatched entry; returns how many were handed over
    ///
    /// Stops at the first queue error and leaves the rest for the next pass.
    pub async fn dispatch_pending(&self) -> Result<usize> {
        let pending = self.store.outbox_pending().await?;
        let mut dispatched = 0;

        for entry in pending {
            let task_id = entry.task.task_id.clone();
            let added = self.queue.enqueue(entry.task).await?;
            if !added {
                tracing::debug!(task_id = %task_id, "Task already queued");
            }
            self.store.outbox_mark_dispatched(&task_id).await?;
            dispatched += 1;
        }

        if dispatched > 0 {
            tracing::debug!(dispatched, "Outbox dispatched");
        }
        Ok(dispatched)
    }

    /// Re-dispatch entries whose task may have been lost with the queue
    ///
    /// Called once at startup. The queue ignores ids it still holds.
    pub async fn recover(&self) -> Result<usize> {
        let reset = self.store.outbox_reset().await?;
        if reset > 0 {
            tracing::info!(entries = reset, "Re-dispatching unfinished tasks");
        }
        self.dispatch_pending().await
    }

    /// Dispatch on an interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_pending().await {
                        tracing::warn!(error = %e, "Outbox dispatch failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryTaskQueue, QueueConfig};
    use crate::resource::NewResource;
    use crate::store::MemoryStore;
    use crate::task::ProvisioningTask;
    use hostflow_cloud::ServerSpec;

    async fn seeded() -> (Arc<MemoryStore>, Arc<MemoryTaskQueue>, OutboxRelay) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryTaskQueue::new(QueueConfig::default()));
        let resource = NewResource::new(
            "tenant-1",
            "user-1",
            ServerSpec::new("web", "cx22", "fsn1", "ubuntu-24.04"),
        )
        .into_resource();
        let task = ProvisioningTask::create(&resource);
        store.create(resource, task).await.unwrap();

        let relay = OutboxRelay::new(store.clone(), queue.clone(), Duration::from_secs(1));
        (store, queue, relay)
    }

    #[tokio::test]
    async fn test_dispatch_marks_entries() {
        let (store, queue, relay) = seeded().await;

        assert_eq!(relay.dispatch_pending().await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().queued(), 1);
        assert!(store.outbox_pending().await.unwrap().is_empty());

        assert_eq!(relay.dispatch_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_outage_keeps_entry_pending() {
        let (store, queue, relay) = seeded().await;
        queue.set_available(false).await;

        assert!(relay.dispatch_pending().await.is_err());
        assert_eq!(store.outbox_pending().await.unwrap().len(), 1);

        queue.set_available(true).await;
        assert_eq!(relay.dispatch_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recover_does_not_duplicate_queued_tasks() {
        let (_store, queue, relay) = seeded().await;
        relay.dispatch_pending().await.unwrap();

        assert_eq!(relay.recover().await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().queued(), 1);
    }
}
