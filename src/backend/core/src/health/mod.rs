//! Health checks for the store, the queue and the outbox backlog.

mod check;

pub use check::*;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::jobs::{JobQueue, JobStore};

/// Health check configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Timeout for individual health checks
    pub check_timeout: Duration,
    /// Outbox size above which the relay is considered behind
    pub outbox_backlog_threshold: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(2),
            outbox_backlog_threshold: 1_000,
        }
    }
}

/// Runs the component checks behind `GET /health`.
#[derive(Clone)]
pub struct HealthService {
    config: HealthConfig,
    store: Arc<dyn JobStore>,
    queue: JobQueue,
    started_at: Instant,
}

impl HealthService {
    pub fn new(config: HealthConfig, store: Arc<dyn JobStore>, queue: JobQueue) -> Self {
        Self {
            config,
            store,
            queue,
            started_at: Instant::now(),
        }
    }

    /// Run all health checks concurrently with timeout per check.
    pub async fn check_health(&self) -> HealthReport {
        let (database, queue, outbox) = tokio::join!(
            self.timed("database", self.check_database()),
            self.timed("queue", self.check_queue()),
            self.timed("outbox", self.check_outbox()),
        );
        HealthReport::new(self.started_at.elapsed(), vec![database, queue, outbox])
    }

    async fn timed<F>(&self, name: &str, check: F) -> ComponentHealth
    where
        F: std::future::Future<Output = ComponentHealth>,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.config.check_timeout, check).await {
            Ok(health) => health.with_latency(start.elapsed()),
            Err(_) => ComponentHealth::unhealthy(name).with_message("Health check timed out"),
        }
    }

    async fn check_database(&self) -> ComponentHealth {
        match self.store.ping().await {
            Ok(()) => ComponentHealth::healthy("database"),
            Err(e) => ComponentHealth::unhealthy("database").with_message(e.to_string()),
        }
    }

    async fn check_queue(&self) -> ComponentHealth {
        if let Err(e) = self.queue.ping().await {
            return ComponentHealth::unhealthy("queue").with_message(e.to_string());
        }
        match self.queue.depth().await {
            Ok(depth) => ComponentHealth::healthy("queue").with_message(format!("{} envelopes queued", depth)),
            Err(e) => ComponentHealth::unhealthy("queue").with_message(e.to_string()),
        }
    }

    async fn check_outbox(&self) -> ComponentHealth {
        match self.store.outbox_backlog().await {
            Ok(backlog) if backlog > self.config.outbox_backlog_threshold => {
                ComponentHealth::degraded("outbox").with_message(format!(
                    "{} envelopes awaiting relay (threshold {})",
                    backlog, self.config.outbox_backlog_threshold
                ))
            }
            Ok(backlog) => {
                ComponentHealth::healthy("outbox").with_message(format!("{} envelopes awaiting relay", backlog))
            }
            Err(e) => ComponentHealth::unhealthy("outbox").with_message(e.to_string()),
        }
    }

    /// Get the service uptime.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{JobId, JobRecord};
    use crate::jobs::InMemoryJobStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_all_healthy() {
        let store = Arc::new(InMemoryJobStore::new());
        let (queue, _backend) = JobQueue::in_memory();
        queue.push("x").await.unwrap();

        let report = HealthService::new(HealthConfig::default(), store, queue)
            .check_health()
            .await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(
            report.component("queue").unwrap().message.as_deref(),
            Some("1 envelopes queued")
        );
    }

    #[tokio::test]
    async fn test_outbox_backlog_degrades() {
        let store = Arc::new(InMemoryJobStore::new());
        let (queue, _backend) = JobQueue::in_memory();
        for _ in 0..3 {
            let record = JobRecord::pending(JobId::new(), "echo", json!({}));
            store.insert_with_outbox(&record, "{}", Duration::ZERO).await.unwrap();
        }

        let config = HealthConfig {
            outbox_backlog_threshold: 2,
            ..HealthConfig::default()
        };
        let report = HealthService::new(config, store, queue).check_health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.is_operational());
    }

    #[tokio::test]
    async fn test_outage_is_unhealthy() {
        let store = Arc::new(InMemoryJobStore::new());
        let (queue, backend) = JobQueue::in_memory();
        backend.set_available(false);

        let report = HealthService::new(HealthConfig::default(), store, queue)
            .check_health()
            .await;
        assert_eq!(report.component("queue").unwrap().status, HealthStatus::Unhealthy);
        assert!(!report.is_operational());
    }
}
