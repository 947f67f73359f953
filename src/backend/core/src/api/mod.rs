//! HTTP interface.
//!
//! - `POST /tasks` submits a job and answers `202 {"task_id": ...}`
//! - `GET /tasks/:task_id` reads a job record
//! - `GET /health` reports store, queue and outbox health
//! - `GET /metrics` serves Prometheus text

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::health::HealthService;
use crate::jobs::JobService;
use crate::observability::Metrics;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: JobService,
    pub health: HealthService,
    pub metrics: Metrics,
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tasks", post(handlers::submit_task))
        .route("/tasks/:task_id", get(handlers::get_task_status))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
