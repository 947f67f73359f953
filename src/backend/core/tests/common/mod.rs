//! Shared fixtures: the whole job protocol wired over in-memory backends.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use taskq_core::jobs::{
    EchoTask, HandlerError, InMemoryJobStore, InMemoryQueueBackend, JobId, JobQueue, JobRecord,
    JobService, JobStore, JobWorker, OutboxEntry, TaskHandler, TaskRegistry, Transition,
    TransitionOutcome, WorkerConfig,
};
use taskq_core::TaskqError;

pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub backend: Arc<InMemoryQueueBackend>,
    pub queue: JobQueue,
    pub service: JobService,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let (queue, backend) = JobQueue::in_memory();
        let service = JobService::new(store.clone(), queue.clone());
        Self {
            store,
            backend,
            queue,
            service,
        }
    }

    pub fn worker(&self, name: &str) -> JobWorker {
        self.worker_with(name, registry())
    }

    pub fn worker_with(&self, name: &str, registry: TaskRegistry) -> JobWorker {
        JobWorker::new(fast_config(name), self.store.clone(), self.queue.clone(), registry)
    }

    /// A worker whose terminal writes go through `store`.
    pub fn worker_over(&self, name: &str, store: Arc<FinishFaultStore>) -> JobWorker {
        JobWorker::new(fast_config(name), store, self.queue.clone(), registry())
    }

    /// Poll until the job is terminal, failing the test after five seconds.
    pub async fn wait_terminal(&self, id: JobId) -> JobRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let record = self.service.get_status(&id.to_string()).await.unwrap();
            if record.status.is_terminal() {
                return record;
            }
            assert!(tokio::time::Instant::now() < deadline, "job {} never finished", id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn fast_config(name: &str) -> WorkerConfig {
    WorkerConfig {
        name: name.to_string(),
        dequeue_timeout: Duration::from_millis(20),
        store_retry_interval: Duration::from_millis(20),
        queue_retry_interval: Duration::from_millis(20),
        error_pause: Duration::from_millis(20),
    }
}

/// Sleeps before echoing its params.
pub struct SlowTask(pub Duration);

#[async_trait]
impl TaskHandler for SlowTask {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn execute(&self, params: &Value) -> Result<Value, HandlerError> {
        tokio::time::sleep(self.0).await;
        Ok(params.clone())
    }
}

/// Always fails with the message in `params.reason`.
pub struct RejectTask;

#[async_trait]
impl TaskHandler for RejectTask {
    fn name(&self) -> &'static str {
        "reject"
    }

    async fn execute(&self, params: &Value) -> Result<Value, HandlerError> {
        let reason = params.get("reason").and_then(Value::as_str).unwrap_or("rejected");
        Err(HandlerError::new(reason))
    }
}

/// Returns a title the way `scan_url` would, NUL included.
pub struct NulTitleTask;

#[async_trait]
impl TaskHandler for NulTitleTask {
    fn name(&self) -> &'static str {
        "nul_title"
    }

    async fn execute(&self, _params: &Value) -> Result<Value, HandlerError> {
        Ok(json!({"title": "a\u{0}b"}))
    }
}

pub fn registry() -> TaskRegistry {
    TaskRegistry::builder()
        .register(EchoTask)
        .register(SlowTask(Duration::from_millis(200)))
        .register(RejectTask)
        .register(NulTitleTask)
        .build()
}

/// How [`FinishFaultStore`] treats terminal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishFault {
    None,
    /// Every terminal write fails as if the store went away.
    Outage,
    /// Terminal writes whose payload holds a NUL are refused, like `jsonb` does.
    RejectNul,
}

/// Wraps the in-memory store and injects faults into terminal writes only.
pub struct FinishFaultStore {
    inner: Arc<InMemoryJobStore>,
    fault: Mutex<FinishFault>,
}

impl FinishFaultStore {
    pub fn new(inner: Arc<InMemoryJobStore>, fault: FinishFault) -> Self {
        Self {
            inner,
            fault: Mutex::new(fault),
        }
    }

    pub fn set_fault(&self, fault: FinishFault) {
        *self.fault.lock() = fault;
    }
}

#[async_trait]
impl JobStore for FinishFaultStore {
    async fn insert_with_outbox(
        &self,
        record: &JobRecord,
        envelope: &str,
        lease: Duration,
    ) -> taskq_core::Result<OutboxEntry> {
        self.inner.insert_with_outbox(record, envelope, lease).await
    }

    async fn get(&self, id: JobId) -> taskq_core::Result<Option<JobRecord>> {
        self.inner.get(id).await
    }

    async fn transition(&self, id: JobId, transition: &Transition) -> taskq_core::Result<TransitionOutcome> {
        if transition.to_status().is_terminal() {
            let fault = *self.fault.lock();
            match fault {
                FinishFault::Outage => {
                    return Err(TaskqError::storage_unavailable("connection reset"));
                }
                FinishFault::RejectNul => {
                    let has_nul = transition.result().map_or(false, |r| r.to_string().contains("\\u0000"));
                    if has_nul {
                        return Err(TaskqError::storage_query_failed(
                            "unsupported Unicode escape sequence",
                        ));
                    }
                }
                FinishFault::None => {}
            }
        }
        self.inner.transition(id, transition).await
    }

    async fn claim_outbox(&self, limit: usize, lease: Duration) -> taskq_core::Result<Vec<OutboxEntry>> {
        self.inner.claim_outbox(limit, lease).await
    }

    async fn ack_outbox(&self, entry_id: i64) -> taskq_core::Result<()> {
        self.inner.ack_outbox(entry_id).await
    }

    async fn release_outbox(&self, entry_id: i64) -> taskq_core::Result<()> {
        self.inner.release_outbox(entry_id).await
    }

    async fn outbox_backlog(&self) -> taskq_core::Result<u64> {
        self.inner.outbox_backlog().await
    }

    async fn ping(&self) -> taskq_core::Result<()> {
        self.inner.ping().await
    }
}

pub fn echo_params() -> Value {
    json!({"x": 1})
}
