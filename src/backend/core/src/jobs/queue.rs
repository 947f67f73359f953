//! Work queue carrying serialized envelopes, plus its dead-letter list.
//!
//! Producers append at one end and consumers take from the other, so the
//! queue is FIFO. Delivery is at-least-once; the store's conditional
//! transitions make redelivery harmless.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{Result, TaskqError};

/// Trait for queue backends.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append an envelope.
    async fn push(&self, envelope: &str) -> Result<()>;

    /// Take the oldest envelope, waiting at most `timeout` for one to arrive.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>>;

    /// Park an envelope the worker could not finish recording.
    async fn push_dead_letter(&self, envelope: &str) -> Result<()>;

    /// Current queue depth.
    async fn len(&self) -> Result<usize>;

    /// Check if the queue is empty.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn ping(&self) -> Result<()>;
}

/// Name of the dead-letter list for a queue.
pub fn dead_letter_key(queue_name: &str) -> String {
    format!("{}:dead_letter", queue_name)
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory backend
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory queue backend for testing and development.
#[derive(Debug, Default)]
pub struct InMemoryQueueBackend {
    items: Mutex<VecDeque<String>>,
    dead_letters: Mutex<Vec<String>>,
    notify: Notify,
    unavailable: AtomicBool,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the queue going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
        if available {
            self.notify.notify_waiters();
        }
    }

    /// Envelopes currently queued, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.items.lock().iter().rev().cloned().collect()
    }

    pub fn dead_letters(&self) -> Vec<String> {
        self.dead_letters.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TaskqError::queue_unavailable("in-memory queue switched off"));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn push(&self, envelope: &str) -> Result<()> {
        self.check()?;
        self.items.lock().push_front(envelope.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.check()?;
            let next = self.items.lock().pop_back();
            if let Some(envelope) = next {
                return Ok(Some(envelope));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn push_dead_letter(&self, envelope: &str) -> Result<()> {
        self.check()?;
        self.dead_letters.lock().push(envelope.to_string());
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        self.check()?;
        Ok(self.items.lock().len())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis list backend: `LPUSH` to produce, `BRPOP` to consume.
pub struct RedisQueueBackend {
    client: redis::Client,
    manager: ConnectionManager,
    queue_key: String,
    dead_letter_key: String,
}

impl RedisQueueBackend {
    /// Connect to Redis and bind to the list named `queue_key`.
    pub async fn connect(url: &str, queue_key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| TaskqError::configuration(format!("invalid redis url: {}", e)))?;
        let manager = ConnectionManager::new(client.clone()).await?;
        let queue_key = queue_key.into();

        tracing::info!(queue = %queue_key, "Connected to Redis queue");
        Ok(Self {
            client,
            manager,
            dead_letter_key: dead_letter_key(&queue_key),
            queue_key,
        })
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn push(&self, envelope: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(envelope)
            .query_async::<_, i64>(&mut conn)
            .await?;

        tracing::debug!(queue = %self.queue_key, "Envelope pushed");
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        // A blocked BRPOP stalls every command pipelined behind it, so it
        // gets its own connection instead of the shared manager.
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_key)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        Ok(result.map(|(_key, envelope)| envelope))
    }

    async fn push_dead_letter(&self, envelope: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("LPUSH")
            .arg(&self.dead_letter_key)
            .arg(envelope)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.manager.clone();
        let length: usize = redis::cmd("LLEN")
            .arg(&self.queue_key)
            .query_async(&mut conn)
            .await?;
        Ok(length)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JobQueue
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared handle on a queue backend.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    /// Create a new in-memory job queue (for testing).
    pub fn in_memory() -> (Self, Arc<InMemoryQueueBackend>) {
        let backend = Arc::new(InMemoryQueueBackend::new());
        (Self::new(backend.clone()), backend)
    }

    pub async fn push(&self, envelope: &str) -> Result<()> {
        self.backend.push(envelope).await
    }

    pub async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        self.backend.pop(timeout).await
    }

    pub async fn dead_letter(&self, envelope: &str) -> Result<()> {
        self.backend.push_dead_letter(envelope).await?;
        metrics::counter!("taskq_dead_lettered_total").increment(1);
        Ok(())
    }

    pub async fn depth(&self) -> Result<usize> {
        self.backend.len().await
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").finish_non_exhaustive()
    }
}
