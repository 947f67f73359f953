//! Database layer for taskq.
//!
//! Uses PostgreSQL for persistent storage with sqlx. Status columns use the
//! `task_status` enum and are cast to and from text at the query boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{Result, TaskqError};
use crate::jobs::job::{JobId, JobRecord, JobStatus, Transition, TransitionOutcome};
use crate::jobs::store::{JobStore, OutboxEntry};

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| TaskqError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A [`JobStore`] over this pool.
    pub fn job_store(&self) -> PgJobStore {
        PgJobStore::new(self.pool.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub task_name: String,
    pub params: serde_json::Value,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

impl TryFrom<TaskRow> for JobRecord {
    type Error = TaskqError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(JobRecord {
            id: JobId(row.id),
            task_name: row.task_name,
            params: row.params,
            status: row.status.parse()?,
            submitted_at: row.submitted_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            result: row.result,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    task_id: Uuid,
    envelope: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Store
// ═══════════════════════════════════════════════════════════════════════════════

/// PostgreSQL-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_with_outbox(
        &self,
        record: &JobRecord,
        envelope: &str,
        lease: Duration,
    ) -> Result<OutboxEntry> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_name, params, status, submitted_at)
            VALUES ($1, $2, $3, $4::task_status, $5)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.task_name)
        .bind(&record.params)
        .bind(record.status.as_str())
        .bind(record.submitted_at)
        .execute(&mut *tx)
        .await?;

        let entry_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO task_outbox (task_id, envelope, claimed_until)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            RETURNING id
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(envelope)
        .bind(lease.as_secs_f64())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(OutboxEntry {
            id: entry_id,
            task_id: record.id,
            envelope: envelope.to_string(),
        })
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, task_name, params, status::text AS status,
                   submitted_at, started_at, completed_at, result
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn transition(&self, id: JobId, transition: &Transition) -> Result<TransitionOutcome> {
        transition.ensure_allowed()?;
        let (started_at, completed_at) = match transition.to {
            JobStatus::InProgress => (Some(transition.at), None),
            JobStatus::Completed | JobStatus::Failed => (None, Some(transition.at)),
            JobStatus::Pending => (None, None),
        };

        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $3::task_status,
                started_at = COALESCE($4, started_at),
                completed_at = COALESCE($5, completed_at),
                result = COALESCE($6, result)
            WHERE id = $1 AND status = $2::task_status
            "#,
        )
        .bind(id.as_uuid())
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(started_at)
        .bind(completed_at)
        .bind(&transition.result)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            return Ok(TransitionOutcome::Applied);
        }

        let actual: Option<String> =
            sqlx::query_scalar("SELECT status::text FROM tasks WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        match actual {
            Some(status) => Ok(TransitionOutcome::Conflict {
                actual: status.parse()?,
            }),
            None => Ok(TransitionOutcome::Missing),
        }
    }

    async fn claim_outbox(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>> {
        let mut rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE task_outbox
            SET claimed_until = NOW() + make_interval(secs => $2)
            WHERE id IN (
                SELECT id FROM task_outbox
                WHERE claimed_until IS NULL OR claimed_until <= NOW()
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, task_id, envelope
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.sort_by_key(|row| row.id);
        Ok(rows
            .into_iter()
            .map(|row| OutboxEntry {
                id: row.id,
                task_id: JobId(row.task_id),
                envelope: row.envelope,
            })
            .collect())
    }

    async fn ack_outbox(&self, entry_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM task_outbox WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_outbox(&self, entry_id: i64) -> Result<()> {
        sqlx::query("UPDATE task_outbox SET claimed_until = NULL WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn outbox_backlog(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_outbox")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_to_record() {
        let id = Uuid::new_v4();
        let row = TaskRow {
            id,
            task_name: "echo".to_string(),
            params: json!({"x": 1}),
            status: "COMPLETED".to_string(),
            submitted_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            result: Some(json!({"x": 1})),
        };

        let record = JobRecord::try_from(row).unwrap();
        assert_eq!(record.id, JobId(id));
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        let row = TaskRow {
            id: Uuid::new_v4(),
            task_name: "echo".to_string(),
            params: json!({}),
            status: "RUNNING".to_string(),
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        };
        assert!(JobRecord::try_from(row).is_err());
    }
}
