#![allow(clippy::result_large_err)]
//! # taskq core
//!
//! Durable job submission and execution over PostgreSQL and Redis.
//!
//! ## Architecture
//!
//! - **Jobs**: record/envelope model, task registry, gateway, outbox relay and worker loop
//! - **DB**: PostgreSQL job store with embedded migrations
//! - **API**: axum HTTP surface for submission, status, health and metrics
//! - **Health**: component checks for store, queue and outbox
//! - **Observability**: tracing subscriber, optional OTLP export, Prometheus metrics

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod jobs;
pub mod observability;
pub mod signal;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, TaskqError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, Result, TaskqError};
    pub use crate::jobs::{
        Envelope, JobId, JobOutcome, JobQueue, JobRecord, JobService, JobStatus, JobStore,
        JobWorker, OutboxRelay, TaskHandler, TaskRegistry, WorkerConfig,
    };
}
