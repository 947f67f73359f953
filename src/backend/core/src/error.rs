//! Error handling for taskq.
//!
//! This module provides:
//! - A single error type carrying a stable machine-readable code
//! - HTTP status code mapping for the gateway
//! - User-facing messages kept apart from internal detail
//! - Severity-based logging and an error counter
//!
//! Infrastructure errors from sqlx and redis convert into the outage codes the
//! worker loop and the gateway react to. A store that answered but refused the
//! statement is a query failure, not an outage.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for taskq operations.
pub type Result<T> = std::result::Result<T, TaskqError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and appear verbatim in HTTP error bodies. The
/// job-level codes also appear in the `code` field of failure payloads the
/// worker writes into job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request errors (1000-1099)
    ValidationError,
    InvalidIdentifier,
    TaskNotFound,

    // Job lifecycle errors (1100-1199)
    InvalidStateTransition,
    UnregisteredTask,
    HandlerFailure,

    // Infrastructure errors (2000-2099)
    StorageUnavailable,
    QueueUnavailable,
    DuplicateRecord,
    StorageQueryFailed,

    // Serialization errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Configuration errors (5000-5099)
    ConfigurationError,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ValidationError => 1000,
            Self::InvalidIdentifier => 1001,
            Self::TaskNotFound => 1002,

            Self::InvalidStateTransition => 1100,
            Self::UnregisteredTask => 1101,
            Self::HandlerFailure => 1102,

            Self::StorageUnavailable => 2000,
            Self::QueueUnavailable => 2001,
            Self::DuplicateRecord => 2002,
            Self::StorageQueryFailed => 2003,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier => StatusCode::BAD_REQUEST,
            Self::TaskNotFound => StatusCode::NOT_FOUND,
            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidStateTransition | Self::DuplicateRecord => StatusCode::CONFLICT,
            Self::StorageUnavailable | Self::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnregisteredTask
            | Self::HandlerFailure
            | Self::StorageQueryFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure is an outage that a caller may retry later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable | Self::QueueUnavailable)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "request",
            1100..=1199 => "job",
            2000..=2099 => "infrastructure",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller mistakes
    Low,
    /// Per-job failures that resolve into a terminal state
    Medium,
    /// System errors
    High,
    /// Dependency outages
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::InvalidIdentifier
            | ErrorCode::TaskNotFound
            | ErrorCode::DuplicateRecord => Self::Low,

            ErrorCode::InvalidStateTransition
            | ErrorCode::UnregisteredTask
            | ErrorCode::HandlerFailure => Self::Medium,

            ErrorCode::StorageQueryFailed
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::StorageUnavailable
            | ErrorCode::QueueUnavailable
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for taskq.
#[derive(Error, Debug)]
pub struct TaskqError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for TaskqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl TaskqError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a validation error for a malformed submission.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create an error for a syntactically invalid job identifier.
    pub fn invalid_identifier(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self::new(ErrorCode::InvalidIdentifier, "Invalid Task ID format.")
            .with_context("task_id", raw)
    }

    /// Create a not found error for a well-formed but unknown job id.
    pub fn task_not_found(task_id: uuid::Uuid) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task with ID {} not found.", task_id),
        )
        .with_details(ErrorDetails::new().with_entity("task", task_id.to_string()))
    }

    /// Create a storage outage error.
    pub fn storage_unavailable(internal: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StorageUnavailable,
            "The job store is unavailable",
            internal,
        )
    }

    /// Create an error for a statement the store received and rejected.
    pub fn storage_query_failed(internal: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StorageQueryFailed,
            "The job store rejected the operation",
            internal,
        )
    }

    /// Create an error for a status change the lifecycle does not allow.
    pub fn invalid_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::with_internal(
            ErrorCode::InvalidStateTransition,
            "Invalid job status transition",
            format!("{} -> {}", from, to),
        )
    }

    /// Create a queue outage error.
    pub fn queue_unavailable(internal: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::QueueUnavailable,
            "The work queue is unavailable",
            internal,
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_internal(ErrorCode::ConfigurationError, "Invalid configuration", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// True for dependency outages the worker absorbs into its retry loops.
    pub fn is_storage_outage(&self) -> bool {
        self.code == ErrorCode::StorageUnavailable
    }

    pub fn is_queue_outage(&self) -> bool {
        self.code == ErrorCode::QueueUnavailable
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Dependency or internal failure"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Job-level failure"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Rejected request"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "taskq_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response body for HTTP clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for HTTP responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&TaskqError> for ErrorResponse {
    fn from(error: &TaskqError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for TaskqError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for TaskqError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("pkey") || constraint.contains("unique") {
                        return Self::with_internal(
                            ErrorCode::DuplicateRecord,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                // SQLSTATE class 08 (connection exception), 53 (insufficient
                // resources) and 57P (operator intervention) mean the server
                // cannot serve us right now.
                let outage = db_err.code().map_or(false, |code| {
                    code.starts_with("08") || code.starts_with("53") || code.starts_with("57P")
                });
                if outage {
                    Self::storage_unavailable(error.to_string()).with_source(error)
                } else {
                    Self::storage_query_failed(error.to_string()).with_source(error)
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => {
                Self::storage_unavailable(error.to_string()).with_source(error)
            }
            _ => Self::storage_query_failed(error.to_string()).with_source(error),
        }
    }
}

impl From<redis::RedisError> for TaskqError {
    fn from(error: redis::RedisError) -> Self {
        Self::queue_unavailable(error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for TaskqError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for TaskqError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration(error.to_string()).with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
