//! Configuration management.
//!
//! Values come from an optional file overlaid by `TASKQ__*` environment
//! variables, e.g. `TASKQ__DATABASE__URL` or `TASKQ__WORKER__CONCURRENCY`.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, TaskqError};

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store configuration
    pub database: DatabaseConfig,

    /// Work queue configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker loop configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Outbox relay configuration
    #[serde(default)]
    pub outbox: OutboxSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Name of the list carrying envelopes
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            queue_name: default_queue_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Number of consume loops in one worker process
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Worker name used in logs
    #[serde(default = "default_worker_name")]
    pub name: String,

    /// Upper bound of one blocking pop; cancellation is observed between pops
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub dequeue_timeout: Duration,

    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub store_retry_interval: Duration,

    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub queue_retry_interval: Duration,

    /// Pause after an unexpected error in the loop body
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub error_pause: Duration,

    /// Port of the worker's Prometheus scrape listener
    #[serde(default = "default_worker_metrics_port")]
    pub metrics_port: u16,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            name: default_worker_name(),
            dequeue_timeout: default_retry_interval(),
            store_retry_interval: default_retry_interval(),
            queue_retry_interval: default_retry_interval(),
            error_pause: default_retry_interval(),
            metrics_port: default_worker_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxSettings {
    #[serde(default = "default_outbox_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum envelopes relayed per poll
    #[serde(default = "default_outbox_batch_size")]
    pub batch_size: usize,

    /// How long a claimed row stays invisible to other relays
    #[serde(default = "default_outbox_claim_lease", with = "humantime_serde")]
    pub claim_lease: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_outbox_poll_interval(),
            batch_size: default_outbox_batch_size(),
            claim_lease: default_outbox_claim_lease(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Install the Prometheus recorder
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_queue_name() -> String { "task_queue".to_string() }
fn default_concurrency() -> usize { 1 }
fn default_worker_name() -> String { "taskq-worker".to_string() }
fn default_retry_interval() -> Duration { Duration::from_secs(5) }
fn default_worker_metrics_port() -> u16 { 9100 }
fn default_outbox_poll_interval() -> Duration { Duration::from_secs(1) }
fn default_outbox_batch_size() -> usize { 100 }
fn default_outbox_claim_lease() -> Duration { Duration::from_secs(30) }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_enabled() -> bool { true }

impl Config {
    /// Load configuration from the environment, optionally layered over a file.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("TASKQ").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the processes cannot start with.
    pub fn validate(&self) -> Result<()> {
        if !(self.database.url.starts_with("postgres://")
            || self.database.url.starts_with("postgresql://"))
        {
            return Err(TaskqError::configuration(
                "database.url must be a postgres:// or postgresql:// URL",
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(TaskqError::configuration(
                "database.min_connections must not exceed database.max_connections",
            ));
        }
        if !(self.redis.url.starts_with("redis://") || self.redis.url.starts_with("rediss://")) {
            return Err(TaskqError::configuration(
                "redis.url must be a redis:// or rediss:// URL",
            ));
        }
        if self.redis.queue_name.trim().is_empty() {
            return Err(TaskqError::configuration("redis.queue_name must not be empty"));
        }
        if self.worker.concurrency == 0 {
            return Err(TaskqError::configuration("worker.concurrency must be at least 1"));
        }
        if self.outbox.batch_size == 0 {
            return Err(TaskqError::configuration("outbox.batch_size must be at least 1"));
        }

        let durations = [
            ("database.acquire_timeout", self.database.acquire_timeout),
            ("worker.dequeue_timeout", self.worker.dequeue_timeout),
            ("worker.store_retry_interval", self.worker.store_retry_interval),
            ("worker.queue_retry_interval", self.worker.queue_retry_interval),
            ("worker.error_pause", self.worker.error_pause),
            ("outbox.poll_interval", self.outbox.poll_interval),
            ("outbox.claim_lease", self.outbox.claim_lease),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(TaskqError::configuration(format!("{} must be greater than zero", name)));
            }
        }

        Ok(())
    }

    /// Socket address string for the worker's metrics listener.
    pub fn worker_metrics_address(&self) -> String {
        format!("{}:{}", self.server.host, self.worker.metrics_port)
    }

    /// Socket address string for the HTTP listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
