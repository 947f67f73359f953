//! API request handlers.
//!
//! Handlers return `Result<impl IntoResponse, TaskqError>` so failures map to
//! HTTP statuses through the `IntoResponse` implementation on `TaskqError`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::TaskqError;
use crate::jobs::{JobId, JobRecord, JobStatus};

// ═══════════════════════════════════════════════════════════════════════════════
// Task Handlers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_name: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: JobId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub id: JobId,
    pub task_name: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

impl From<JobRecord> for TaskStatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            task_name: record.task_name,
            status: record.status,
            submitted_at: record.submitted_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            result: record.result,
        }
    }
}

/// POST /tasks
pub async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, TaskqError> {
    let Json(req) = payload.map_err(|rejection| TaskqError::validation(rejection.body_text()))?;
    let task_id = state.service.submit(&req.task_name, req.params).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitTaskResponse { task_id })))
}

/// GET /tasks/:task_id
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, TaskqError> {
    let record = state.service.get_status(&task_id).await?;
    Ok(Json(TaskStatusResponse::from(record)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health & Metrics
// ═══════════════════════════════════════════════════════════════════════════════

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check_health().await;
    let status = if report.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
