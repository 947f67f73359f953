//! Outbox relay: moves committed envelopes from the store onto the queue.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::queue::JobQueue;
use super::store::JobStore;
use crate::config::OutboxSettings;
use crate::error::Result;

/// Periodically drains the outbox.
///
/// Several relays may run against the same store; claimed rows are leased so
/// each envelope has one relay working on it at a time.
pub struct OutboxRelay {
    store: Arc<dyn JobStore>,
    queue: JobQueue,
    settings: OutboxSettings,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn JobStore>, queue: JobQueue, settings: OutboxSettings) -> Self {
        Self {
            store,
            queue,
            settings,
        }
    }

    /// Relay one batch, returning how many envelopes reached the queue.
    ///
    /// Stops at the first failed push; the remaining claimed rows become
    /// visible again once their lease runs out.
    pub async fn run_once(&self) -> Result<usize> {
        let entries = self
            .store
            .claim_outbox(self.settings.batch_size, self.settings.claim_lease)
            .await?;

        let mut relayed = 0;
        for entry in entries {
            self.queue.push(&entry.envelope).await?;
            relayed += 1;
            metrics::counter!("taskq_outbox_relayed_total").increment(1);

            // If this fails the row is pushed again later; the worker's
            // conditional start rejects the duplicate.
            if let Err(e) = self.store.ack_outbox(entry.id).await {
                tracing::warn!(job_id = %entry.task_id, error = %e, "Failed to clear relayed outbox entry");
            }
        }
        Ok(relayed)
    }

    /// Run until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                poll_interval = ?self.settings.poll_interval,
                batch_size = self.settings.batch_size,
                "Outbox relay started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.run_once().await {
                    Ok(0) => {}
                    Ok(relayed) => tracing::debug!(relayed, "Relayed outbox entries"),
                    Err(e) => tracing::warn!(error = %e, code = %e.code(), "Outbox relay pass failed"),
                }
            }

            tracing::info!("Outbox relay stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{JobId, JobRecord};
    use crate::jobs::store::InMemoryJobStore;
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> OutboxSettings {
        OutboxSettings {
            poll_interval: Duration::from_millis(10),
            batch_size: 2,
            claim_lease: Duration::from_millis(50),
        }
    }

    async fn seed(store: &InMemoryJobStore, n: usize) {
        for i in 0..n {
            let record = JobRecord::pending(JobId::new(), "echo", json!({"i": i}));
            store.insert_with_outbox(&record, &format!("envelope-{}", i), Duration::ZERO).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_run_once_relays_a_batch() {
        let store = Arc::new(InMemoryJobStore::new());
        let (queue, backend) = JobQueue::in_memory();
        seed(&store, 3).await;

        let relay = OutboxRelay::new(store.clone(), queue, settings());
        assert_eq!(relay.run_once().await.unwrap(), 2);
        assert_eq!(relay.run_once().await.unwrap(), 1);
        assert_eq!(relay.run_once().await.unwrap(), 0);

        assert_eq!(backend.snapshot(), vec!["envelope-0", "envelope-1", "envelope-2"]);
        assert_eq!(store.outbox_backlog().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_push_keeps_entry() {
        let store = Arc::new(InMemoryJobStore::new());
        let (queue, backend) = JobQueue::in_memory();
        seed(&store, 1).await;

        let relay = OutboxRelay::new(store.clone(), queue, settings());
        backend.set_available(false);
        assert!(relay.run_once().await.is_err());
        assert_eq!(store.outbox_backlog().await.unwrap(), 1);

        backend.set_available(true);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(relay.run_once().await.unwrap(), 1);
        assert_eq!(backend.snapshot(), vec!["envelope-0"]);
    }

    #[tokio::test]
    async fn test_spawned_relay_stops_on_cancel() {
        let store = Arc::new(InMemoryJobStore::new());
        let (queue, backend) = JobQueue::in_memory();
        seed(&store, 1).await;

        let token = CancellationToken::new();
        let handle = OutboxRelay::new(store.clone(), queue, settings()).spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(backend.snapshot().len(), 1);
    }
}
