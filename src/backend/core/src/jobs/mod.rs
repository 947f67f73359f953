//! Job system for taskq.
//!
//! - **Job**: records, envelopes and the `PENDING → IN_PROGRESS → COMPLETED | FAILED` state machine
//! - **Registry**: immutable task name → handler mapping with panic-safe dispatch
//! - **Store**: durable records plus the outbox of envelopes awaiting the queue
//! - **Queue**: Redis list (or in-memory) carrying envelopes, with a dead-letter list
//! - **Gateway**: submission and status query
//! - **Outbox**: relay that moves committed envelopes onto the queue
//! - **Worker**: cancellable consume loop
//!
//! # Architecture
//!
//! ```text
//!  submit ──▶ JobService ──(one transaction)──▶ tasks + task_outbox
//!                 │                                   │
//!                 └── eager push ──┐   OutboxRelay ◀──┘
//!                                  ▼        │
//!                              task_queue ◀─┘
//!                                  │
//!                                  ▼
//!                 JobWorker ── dispatch ──▶ TaskRegistry
//!                     │
//!                     └── conditional transitions ──▶ tasks
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskq_core::jobs::{JobQueue, JobService, JobWorker, TaskRegistry, WorkerConfig};
//!
//! let service = JobService::new(store.clone(), queue.clone());
//! let id = service.submit("echo", json!({"x": 1})).await?;
//!
//! let worker = JobWorker::new(WorkerConfig::default(), store, queue, TaskRegistry::with_builtins());
//! let handle = worker.start(&shutdown_token);
//! ```

pub mod builtin;
pub mod gateway;
pub mod job;
pub mod outbox;
pub mod queue;
pub mod registry;
pub mod store;
pub mod worker;

pub use builtin::{EchoTask, FetchIpTask, ScanUrlTask};
pub use gateway::JobService;
pub use job::{Envelope, JobId, JobOutcome, JobRecord, JobStatus, Transition, TransitionOutcome};
pub use outbox::OutboxRelay;
pub use queue::{InMemoryQueueBackend, JobQueue, QueueBackend, RedisQueueBackend};
pub use registry::{HandlerError, TaskHandler, TaskRegistry, TaskRegistryBuilder};
pub use store::{InMemoryJobStore, JobStore, OutboxEntry};
pub use worker::{JobWorker, ProcessOutcome, WorkerConfig, WorkerHandle, WorkerStats};
