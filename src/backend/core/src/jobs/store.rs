//! Durable job store abstraction.
//!
//! The store owns job records and the outbox of envelopes that still have to
//! reach the queue. The PostgreSQL implementation lives in [`crate::db`];
//! [`InMemoryJobStore`] backs tests and local development.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::job::{JobId, JobRecord, Transition, TransitionOutcome};
use crate::error::{ErrorCode, Result, TaskqError};

/// An envelope committed alongside its record and not yet pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: i64,
    pub task_id: JobId,
    /// Serialized envelope, exactly as produced at submission
    pub envelope: String,
}

/// Trait for durable store backends.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a PENDING record and its outbox entry in one local transaction.
    ///
    /// Either both exist afterwards or neither does. The entry starts out
    /// claimed by the caller for `lease`, so relays leave it alone until the
    /// caller acks or releases it.
    async fn insert_with_outbox(
        &self,
        record: &JobRecord,
        envelope: &str,
        lease: Duration,
    ) -> Result<OutboxEntry>;

    /// Fetch a record by id.
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Apply `transition` only if the record's current status equals its
    /// source status. Transitions outside the lifecycle are rejected with
    /// `InvalidStateTransition` before anything is read or written.
    async fn transition(&self, id: JobId, transition: &Transition) -> Result<TransitionOutcome>;

    /// Lease up to `limit` outbox entries that no other relay currently holds.
    async fn claim_outbox(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>>;

    /// Remove an outbox entry once its envelope is on the queue.
    async fn ack_outbox(&self, entry_id: i64) -> Result<()>;

    /// Drop the claim on an entry so the next relay pass picks it up.
    async fn release_outbox(&self, entry_id: i64) -> Result<()>;

    /// Number of envelopes still waiting in the outbox.
    async fn outbox_backlog(&self) -> Result<u64>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug)]
struct PendingEntry {
    entry: OutboxEntry,
    claimed_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<JobId, JobRecord>,
    outbox: BTreeMap<i64, PendingEntry>,
    next_outbox_id: i64,
}

/// In-memory store for testing and development.
///
/// Can be switched unavailable to exercise outage handling.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
    operations: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of operations attempted against this store.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Snapshot of every record, in no particular order.
    pub fn records(&self) -> Vec<JobRecord> {
        self.inner.lock().records.values().cloned().collect()
    }

    fn check(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TaskqError::storage_unavailable("in-memory store switched off"));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_with_outbox(
        &self,
        record: &JobRecord,
        envelope: &str,
        lease: Duration,
    ) -> Result<OutboxEntry> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.records.contains_key(&record.id) {
            return Err(TaskqError::new(
                ErrorCode::DuplicateRecord,
                "A record with this identifier already exists",
            ));
        }

        inner.next_outbox_id += 1;
        let entry = OutboxEntry {
            id: inner.next_outbox_id,
            task_id: record.id,
            envelope: envelope.to_string(),
        };
        inner.records.insert(record.id, record.clone());
        inner.outbox.insert(
            entry.id,
            PendingEntry {
                entry: entry.clone(),
                claimed_until: Some(Instant::now() + lease),
            },
        );
        Ok(entry)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.check()?;
        Ok(self.inner.lock().records.get(&id).cloned())
    }

    async fn transition(&self, id: JobId, transition: &Transition) -> Result<TransitionOutcome> {
        transition.ensure_allowed()?;
        self.check()?;
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(TransitionOutcome::Missing);
        };
        if record.status != transition.from_status() {
            return Ok(TransitionOutcome::Conflict {
                actual: record.status,
            });
        }
        record.apply(transition);
        Ok(TransitionOutcome::Applied)
    }

    async fn claim_outbox(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>> {
        self.check()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let claimed = inner
            .outbox
            .values_mut()
            .filter(|p| p.claimed_until.map_or(true, |until| until <= now))
            .take(limit)
            .map(|p| {
                p.claimed_until = Some(now + lease);
                p.entry.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn ack_outbox(&self, entry_id: i64) -> Result<()> {
        self.check()?;
        self.inner.lock().outbox.remove(&entry_id);
        Ok(())
    }

    async fn release_outbox(&self, entry_id: i64) -> Result<()> {
        self.check()?;
        if let Some(pending) = self.inner.lock().outbox.get_mut(&entry_id) {
            pending.claimed_until = None;
        }
        Ok(())
    }

    async fn outbox_backlog(&self) -> Result<u64> {
        self.check()?;
        Ok(self.inner.lock().outbox.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{JobOutcome, JobStatus};
    use serde_json::json;

    fn record() -> JobRecord {
        JobRecord::pending(JobId::new(), "echo", json!({"x": 1}))
    }

    #[tokio::test]
    async fn test_insert_writes_record_and_outbox() {
        let store = InMemoryJobStore::new();
        let record = record();
        let entry = store.insert_with_outbox(&record, "{}", Duration::ZERO).await.unwrap();

        assert_eq!(entry.task_id, record.id);
        assert_eq!(store.get(record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.outbox_backlog().await.unwrap(), 1);

        let err = store.insert_with_outbox(&record, "{}", Duration::ZERO).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateRecord);
    }

    #[tokio::test]
    async fn test_conditional_transition() {
        let store = InMemoryJobStore::new();
        let record = record();
        store.insert_with_outbox(&record, "{}", Duration::ZERO).await.unwrap();

        let start = Transition::start();
        assert_eq!(store.transition(record.id, &start).await.unwrap(), TransitionOutcome::Applied);
        let started_at = store.get(record.id).await.unwrap().unwrap().started_at;

        // A replayed start must not overwrite the timestamp.
        assert_eq!(
            store.transition(record.id, &Transition::start()).await.unwrap(),
            TransitionOutcome::Conflict {
                actual: JobStatus::InProgress
            }
        );
        assert_eq!(store.get(record.id).await.unwrap().unwrap().started_at, started_at);

        let finish = Transition::finish(JobOutcome::Completed(json!({"x": 1})));
        assert_eq!(store.transition(record.id, &finish).await.unwrap(), TransitionOutcome::Applied);
        assert_eq!(
            store.transition(record.id, &finish).await.unwrap(),
            TransitionOutcome::Conflict {
                actual: JobStatus::Completed
            }
        );

        assert_eq!(
            store.transition(JobId::new(), &Transition::start()).await.unwrap(),
            TransitionOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_claim_respects_lease() {
        let store = InMemoryJobStore::new();
        for _ in 0..3 {
            store.insert_with_outbox(&record(), "{}", Duration::ZERO).await.unwrap();
        }

        let first = store.claim_outbox(2, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = store.claim_outbox(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(store.claim_outbox(10, Duration::from_secs(30)).await.unwrap().is_empty());

        store.ack_outbox(first[0].id).await.unwrap();
        assert_eq!(store.outbox_backlog().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_new_entry_is_held_until_released() {
        let store = InMemoryJobStore::new();
        let entry = store
            .insert_with_outbox(&record(), "{}", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(store.claim_outbox(10, Duration::from_secs(30)).await.unwrap().is_empty());

        store.release_outbox(entry.id).await.unwrap();
        let claimed = store.claim_outbox(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(claimed, vec![entry]);
    }

    #[tokio::test]
    async fn test_transition_outside_lifecycle_is_rejected() {
        let store = InMemoryJobStore::new();
        let record = record();
        store.insert_with_outbox(&record, "{}", Duration::ZERO).await.unwrap();

        let rewind = Transition {
            from: JobStatus::Pending,
            to: JobStatus::Completed,
            at: chrono::Utc::now(),
            result: Some(json!({})),
        };
        let err = store.transition(record.id, &rewind).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
        assert_eq!(store.get(record.id).await.unwrap().unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryJobStore::new();
        store.set_available(false);
        let err = store.ping().await.unwrap_err();
        assert!(err.is_storage_outage());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
        assert_eq!(store.operations(), 2);
    }
}
