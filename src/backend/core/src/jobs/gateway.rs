//! Submission gateway and status query.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::job::{Envelope, JobId, JobRecord};
use super::queue::JobQueue;
use super::store::JobStore;
use crate::error::{Result, TaskqError};

/// Longest accepted task name, in characters.
pub const MAX_TASK_NAME_LEN: usize = 255;

/// How long a fresh outbox entry is reserved for the eager push.
pub const DEFAULT_EAGER_PUSH_LEASE: Duration = Duration::from_secs(30);

/// Front door of the job system: accepts submissions and answers status queries.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: JobQueue,
    eager_push_lease: Duration,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, queue: JobQueue) -> Self {
        Self {
            store,
            queue,
            eager_push_lease: DEFAULT_EAGER_PUSH_LEASE,
        }
    }

    /// Reserve new outbox entries for `lease` while the eager push runs.
    pub fn with_eager_push_lease(mut self, lease: Duration) -> Self {
        self.eager_push_lease = lease;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Accept a job and return its id without waiting for execution.
    ///
    /// The record and its outbox entry commit together, so a returned id
    /// always has a durable envelope behind it. The entry is committed
    /// already claimed, so no relay pushes it while the eager push runs. A
    /// failed eager push releases the claim for the relay.
    #[instrument(skip(self, params))]
    pub async fn submit(&self, task_name: &str, params: Value) -> Result<JobId> {
        let task_name = validate_task_name(task_name)?;
        if !params.is_object() {
            return Err(TaskqError::validation("params must be a JSON object"));
        }
        if contains_nul(&params) {
            return Err(TaskqError::validation(
                "params must not contain NUL characters",
            ));
        }

        let record = JobRecord::pending(JobId::new(), task_name, params);
        let envelope = Envelope::for_record(&record).encode()?;
        let entry = self
            .store
            .insert_with_outbox(&record, &envelope, self.eager_push_lease)
            .await?;

        metrics::counter!("taskq_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %record.id, "Job accepted");

        match self.queue.push(&entry.envelope).await {
            Ok(()) => {
                if let Err(e) = self.store.ack_outbox(entry.id).await {
                    tracing::warn!(job_id = %record.id, error = %e, "Envelope pushed but outbox entry not cleared");
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %record.id, error = %e, "Eager push failed, leaving envelope to the outbox relay");
                if let Err(e) = self.store.release_outbox(entry.id).await {
                    tracing::warn!(job_id = %record.id, error = %e, "Outbox entry stays claimed until its lease expires");
                }
            }
        }

        Ok(record.id)
    }

    /// Look up a job by its caller-supplied identifier.
    ///
    /// A malformed identifier is rejected before the store is touched.
    #[instrument(skip(self))]
    pub async fn get_status(&self, raw_id: &str) -> Result<JobRecord> {
        let id = JobId::parse(raw_id)?;
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TaskqError::task_not_found(id.as_uuid()))
    }
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService").finish_non_exhaustive()
    }
}

fn validate_task_name(raw: &str) -> Result<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TaskqError::validation("task_name must be a non-empty string"));
    }
    if name.chars().count() > MAX_TASK_NAME_LEN {
        return Err(TaskqError::validation(format!(
            "task_name must be at most {} characters",
            MAX_TASK_NAME_LEN
        )));
    }
    Ok(name)
}

/// PostgreSQL `jsonb` cannot hold U+0000 in strings or keys.
fn contains_nul(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains('\0'),
        Value::Array(items) => items.iter().any(contains_nul),
        Value::Object(map) => map
            .iter()
            .any(|(key, item)| key.contains('\0') || contains_nul(item)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::job::JobStatus;
    use crate::jobs::store::InMemoryJobStore;
    use serde_json::json;
    use std::time::Duration;

    fn service() -> (JobService, Arc<InMemoryJobStore>, Arc<crate::jobs::queue::InMemoryQueueBackend>) {
        let store = Arc::new(InMemoryJobStore::new());
        let (queue, backend) = JobQueue::in_memory();
        (JobService::new(store.clone(), queue), store, backend)
    }

    #[tokio::test]
    async fn test_submit_creates_pending_record_and_envelope() {
        let (service, store, backend) = service();
        let id = service.submit("echo", json!({"x": 1})).await.unwrap();

        let record = service.get_status(&id.to_string()).await.unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.task_name, "echo");

        let queued = backend.snapshot();
        assert_eq!(queued.len(), 1);
        let envelope = Envelope::decode(&queued[0]).unwrap();
        assert_eq!(envelope.task_id, id);
        assert_eq!(envelope.params, json!({"x": 1}));
        assert_eq!(store.outbox_backlog().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_input_without_side_effects() {
        let (service, store, backend) = service();

        for (name, params) in [
            ("", json!({})),
            ("   ", json!({})),
            ("echo", json!([1, 2])),
            ("echo", json!("x")),
            ("echo", json!({"s": "a\u{0}b"})),
            ("echo", json!({"nested": [{"a\u{0}": 1}]})),
        ] {
            let err = service.submit(name, params).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::ValidationError);
        }
        let long = "a".repeat(MAX_TASK_NAME_LEN + 1);
        assert!(service.submit(&long, json!({})).await.is_err());

        assert_eq!(store.operations(), 0);
        assert!(backend.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_submit_survives_queue_outage() {
        let (service, store, backend) = service();
        backend.set_available(false);

        let id = service.submit("echo", json!({})).await.unwrap();
        assert_eq!(store.outbox_backlog().await.unwrap(), 1);
        assert!(store.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_eager_push_keeps_relay_off_the_entry() {
        let (service, store, backend) = service();

        // Entries stay claimed across the eager push and are gone once acked.
        service.submit("echo", json!({})).await.unwrap();
        assert!(store.claim_outbox(10, Duration::from_secs(30)).await.unwrap().is_empty());
        assert_eq!(store.outbox_backlog().await.unwrap(), 0);

        // A failed eager push hands the entry straight to the relay.
        backend.set_available(false);
        let id = service.submit("echo", json!({})).await.unwrap();
        let claimed = store.claim_outbox(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].task_id, id);
    }

    #[tokio::test]
    async fn test_submit_storage_outage_leaves_nothing() {
        let (service, store, backend) = service();
        store.set_available(false);

        let err = service.submit("echo", json!({})).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageUnavailable);
        assert!(service.queue().pop(Duration::from_millis(10)).await.unwrap().is_none());
        assert!(backend.snapshot().is_empty());
        store.set_available(true);
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_get_status_errors() {
        let (service, store, _backend) = service();

        let err = service.get_status("not-a-uuid").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidIdentifier);
        assert_eq!(store.operations(), 0);

        let err = service.get_status(&JobId::new().to_string()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TaskNotFound);
    }
}
