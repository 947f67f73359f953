//! Job worker: the dequeue → dispatch → record loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::job::{Envelope, JobOutcome, JobStatus, Transition, TransitionOutcome};
use super::queue::JobQueue;
use super::registry::TaskRegistry;
use super::store::JobStore;
use crate::config::WorkerSettings;
use crate::error::{ErrorCode, Result};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker name/identifier
    pub name: String,
    /// Upper bound of one blocking pop
    pub dequeue_timeout: Duration,
    pub store_retry_interval: Duration,
    pub queue_retry_interval: Duration,
    /// Pause after an unexpected error
    pub error_pause: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig::from(&WorkerSettings::default())
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            name: settings.name.clone(),
            dequeue_timeout: settings.dequeue_timeout,
            store_retry_interval: settings.store_retry_interval,
            queue_retry_interval: settings.queue_retry_interval,
            error_pause: settings.error_pause,
        }
    }
}

/// Statistics for the job worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Envelopes that ran to a terminal state
    pub processed: Arc<AtomicU64>,
    pub succeeded: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    /// Duplicate, orphaned or undecodable envelopes
    pub skipped: Arc<AtomicU64>,
    pub dead_lettered: Arc<AtomicU64>,
    /// Currently running jobs
    pub active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// What happened to one dequeued envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The job reached a terminal state
    Finished(JobStatus),
    /// The record was not in the expected state; a replayed envelope
    Duplicate { actual: JobStatus },
    /// No record exists for the envelope's id
    Orphaned,
    /// The envelope could not be decoded and was dropped
    Undecodable,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
    stats: WorkerStats,
}

impl WorkerHandle {
    /// Signal the worker to stop taking new envelopes. The in-flight job, if
    /// any, still runs to completion.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the worker loop to exit.
    pub async fn join(self) -> std::result::Result<(), tokio::task::JoinError> {
        self.join.await
    }
}

/// Job worker that processes envelopes from a queue.
pub struct JobWorker {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    queue: JobQueue,
    registry: TaskRegistry,
    stats: WorkerStats,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        queue: JobQueue,
        registry: TaskRegistry,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            registry,
            stats: WorkerStats::new(),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Start the worker on its own task, returning a handle for control.
    ///
    /// Cancelling `parent` also stops the worker.
    pub fn start(self, parent: &CancellationToken) -> WorkerHandle {
        let shutdown = parent.child_token();
        let stats = self.stats.clone();
        let token = shutdown.clone();
        let join = tokio::spawn(async move { self.run(token).await });

        WorkerHandle {
            shutdown,
            join,
            stats,
        }
    }

    /// Consume envelopes until `token` is cancelled.
    ///
    /// Cancellation is observed between pops and during retry sleeps, never
    /// while a handler runs.
    pub async fn run(&self, token: CancellationToken) {
        let worker = self.config.name.as_str();
        tracing::info!(worker, "Job worker started");

        while !token.is_cancelled() {
            let raw = match self.queue.pop(self.config.dequeue_timeout).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) if e.is_queue_outage() => {
                    tracing::warn!(worker, error = %e, "Queue unavailable, retrying");
                    metrics::counter!("taskq_worker_retries_total", "dependency" => "queue").increment(1);
                    if !sleep_or_cancel(&token, self.config.queue_retry_interval).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    e.log();
                    if !sleep_or_cancel(&token, self.config.error_pause).await {
                        break;
                    }
                    continue;
                }
            };

            match self.process(&raw).await {
                Ok(_) => {}
                Err(e) if e.is_storage_outage() => {
                    tracing::error!(worker, error = %e, "Store unavailable while processing, dead-lettering envelope");
                    self.dead_letter(&raw).await;
                    self.wait_for_store(&token).await;
                }
                Err(e) => {
                    e.log();
                    self.dead_letter(&raw).await;
                    if !sleep_or_cancel(&token, self.config.error_pause).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker, "Worker stopped");
    }

    /// Run one envelope through the lifecycle.
    ///
    /// Handler failures become a FAILED record and are not errors here. A
    /// result the store refuses to hold is replaced by a FAILED payload. An
    /// `Err` means the store could not record the job at all.
    pub async fn process(&self, raw: &str) -> Result<ProcessOutcome> {
        let worker = self.config.name.as_str();
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(worker, error = %e, "Discarding undecodable envelope");
                self.skip("undecodable");
                return Ok(ProcessOutcome::Undecodable);
            }
        };
        let job_id = envelope.task_id;
        let task_name = envelope.task_name.as_str();

        match self.store.transition(job_id, &Transition::start()).await? {
            TransitionOutcome::Applied => {}
            TransitionOutcome::Conflict { actual } => {
                tracing::warn!(worker, %job_id, task_name, status = %actual, "Skipping duplicate envelope");
                self.skip("duplicate");
                return Ok(ProcessOutcome::Duplicate { actual });
            }
            TransitionOutcome::Missing => {
                tracing::warn!(worker, %job_id, task_name, "Skipping envelope with no matching record");
                self.skip("missing");
                return Ok(ProcessOutcome::Orphaned);
            }
        }

        tracing::info!(worker, %job_id, task_name, "Job started");
        self.stats.active.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let outcome = self.registry.dispatch(task_name, &envelope.params).await;
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        metrics::histogram!("taskq_job_duration_seconds", "task_name" => envelope.task_name.clone())
            .record(started.elapsed().as_secs_f64());

        let mut status = outcome.status();
        let finished = match self.store.transition(job_id, &Transition::finish(outcome)).await {
            Ok(finished) => finished,
            Err(e) if e.is_storage_outage() => return Err(e),
            Err(e) => {
                tracing::warn!(worker, %job_id, task_name, error = %e, "Store rejected job result, recording failure");
                let reason = e.internal_message().unwrap_or(e.user_message()).replace('\0', "");
                let fallback = JobOutcome::failed(
                    ErrorCode::StorageQueryFailed,
                    format!("Task result could not be stored: {}", reason),
                );
                status = JobStatus::Failed;
                self.store.transition(job_id, &Transition::finish(fallback)).await?
            }
        };
        match finished {
            TransitionOutcome::Applied => {}
            TransitionOutcome::Conflict { actual } => {
                tracing::warn!(worker, %job_id, task_name, status = %actual, "Job finished elsewhere, result dropped");
                self.skip("duplicate");
                return Ok(ProcessOutcome::Duplicate { actual });
            }
            TransitionOutcome::Missing => {
                tracing::warn!(worker, %job_id, task_name, "Record vanished while job ran");
                self.skip("missing");
                return Ok(ProcessOutcome::Orphaned);
            }
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        match status {
            JobStatus::Completed => self.stats.succeeded.fetch_add(1, Ordering::Relaxed),
            _ => self.stats.failed.fetch_add(1, Ordering::Relaxed),
        };
        metrics::counter!("taskq_jobs_finished_total", "status" => status.as_str()).increment(1);
        tracing::info!(worker, %job_id, task_name, %status, "Job finished");

        Ok(ProcessOutcome::Finished(status))
    }

    fn skip(&self, reason: &'static str) {
        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("taskq_jobs_skipped_total", "reason" => reason).increment(1);
    }

    async fn dead_letter(&self, raw: &str) {
        match self.queue.dead_letter(raw).await {
            Ok(()) => {
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(worker = %self.config.name, error = %e, envelope = raw, "Failed to dead-letter envelope");
            }
        }
    }

    /// Block until the store answers a ping or `token` is cancelled.
    async fn wait_for_store(&self, token: &CancellationToken) {
        let worker = self.config.name.as_str();
        loop {
            if !sleep_or_cancel(token, self.config.store_retry_interval).await {
                return;
            }
            metrics::counter!("taskq_worker_retries_total", "dependency" => "store").increment(1);
            match self.store.ping().await {
                Ok(()) => {
                    tracing::info!(worker, "Store reachable again");
                    return;
                }
                Err(e) => {
                    tracing::warn!(worker, error = %e, "Store still unavailable");
                }
            }
        }
    }
}

/// Sleep for `duration`, returning `false` if cancelled first.
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
