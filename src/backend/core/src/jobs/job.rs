//! Job records, envelopes and the status state machine.
//!
//! - **JobStatus**: `PENDING → IN_PROGRESS → {COMPLETED | FAILED}`, terminal states final
//! - **JobRecord**: the durable row, source of truth for status and result
//! - **Envelope**: the snapshot carried by the queue, the worker's only input

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ErrorCode, Result, TaskqError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a caller-supplied identifier, failing fast on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| TaskqError::invalid_identifier(raw))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Record written, envelope not yet picked up
    Pending,
    /// A worker has dequeued the envelope and is running the handler
    InProgress,
    /// Handler returned a result
    Completed,
    /// Unregistered task, handler error or handler panic
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only transitions the lifecycle allows.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }

    /// Wire and column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = TaskqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(TaskqError::internal(format!("unknown job status '{}'", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// One durable job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub task_name: String,
    pub params: serde_json::Value,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set if and only if `status` is terminal
    pub result: Option<serde_json::Value>,
}

impl JobRecord {
    /// A fresh PENDING record.
    pub fn pending(id: JobId, task_name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id,
            task_name: task_name.into(),
            params,
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    /// Apply a transition locally. Stores use the same rules for their
    /// conditional writes.
    pub fn apply(&mut self, transition: &Transition) {
        self.status = transition.to;
        match transition.to {
            JobStatus::InProgress => self.started_at = Some(transition.at),
            JobStatus::Completed | JobStatus::Failed => {
                self.completed_at = Some(transition.at);
                self.result = transition.result.clone();
            }
            JobStatus::Pending => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Envelope
// ═══════════════════════════════════════════════════════════════════════════════

/// The queue's unit of transport.
///
/// Wire format: `{"task_id": "...", "task_name": "...", "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub task_id: JobId,
    pub task_name: String,
    pub params: serde_json::Value,
}

impl Envelope {
    pub fn for_record(record: &JobRecord) -> Self {
        Self {
            task_id: record.id,
            task_name: record.task_name.clone(),
            params: record.params.clone(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transitions
// ═══════════════════════════════════════════════════════════════════════════════

/// A conditional status change: applied only if the record is currently `from`.
///
/// Built through [`Transition::start`] and [`Transition::finish`] only.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub(crate) from: JobStatus,
    pub(crate) to: JobStatus,
    pub(crate) at: DateTime<Utc>,
    pub(crate) result: Option<serde_json::Value>,
}

impl Transition {
    pub fn from_status(&self) -> JobStatus {
        self.from
    }

    pub fn to_status(&self) -> JobStatus {
        self.to
    }

    /// Payload written with a terminal status.
    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    /// Stores call this before writing anything.
    pub fn ensure_allowed(&self) -> Result<()> {
        if self.from.can_transition_to(self.to) {
            Ok(())
        } else {
            Err(TaskqError::invalid_transition(self.from, self.to))
        }
    }

    /// `PENDING → IN_PROGRESS`, stamping `started_at`.
    pub fn start() -> Self {
        Self {
            from: JobStatus::Pending,
            to: JobStatus::InProgress,
            at: Utc::now(),
            result: None,
        }
    }

    /// `IN_PROGRESS → COMPLETED | FAILED`, stamping `completed_at`.
    pub fn finish(outcome: JobOutcome) -> Self {
        let (to, result) = match outcome {
            JobOutcome::Completed(value) => (JobStatus::Completed, value),
            JobOutcome::Failed(payload) => (JobStatus::Failed, payload),
        };
        Self {
            from: JobStatus::InProgress,
            to,
            at: Utc::now(),
            result: Some(result),
        }
    }
}

/// What the store did with a conditional transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The record was not in the expected state; nothing was written.
    Conflict { actual: JobStatus },
    Missing,
}

/// Terminal result of running one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(serde_json::Value),
    /// Error payload: `{"error": <message>, "code": <ErrorCode>}`
    Failed(serde_json::Value),
}

impl JobOutcome {
    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failed(serde_json::json!({ "error": message.into(), "code": code }))
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed(_) => JobStatus::Completed,
            Self::Failed(_) => JobStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_string()).unwrap(), id);

        let err = JobId::parse("not-a-uuid").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidIdentifier);
    }

    #[test]
    fn test_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_status_transitions_are_one_directional() {
        use JobStatus::*;
        let all = [Pending, InProgress, Completed, Failed];
        let allowed = [(Pending, InProgress), (InProgress, Completed), (InProgress, Failed)];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_value(JobStatus::InProgress).unwrap(), json!("IN_PROGRESS"));
        assert_eq!("COMPLETED".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert!("completed".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_envelope_wire_format() {
        let record = JobRecord::pending(JobId::new(), "echo", json!({"x": 1}));
        let envelope = Envelope::for_record(&record);
        let raw = envelope.encode().unwrap();

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["task_id"], json!(record.id.to_string()));
        assert_eq!(value["task_name"], json!("echo"));
        assert_eq!(value["params"], json!({"x": 1}));
        assert!(Envelope::decode("{\"task_name\": 3}").is_err());
    }

    #[test]
    fn test_record_apply_sets_result_only_when_terminal() {
        let mut record = JobRecord::pending(JobId::new(), "echo", json!({}));
        record.apply(&Transition::start());
        assert_eq!(record.status, JobStatus::InProgress);
        assert!(record.started_at.is_some());
        assert!(record.result.is_none());

        record.apply(&Transition::finish(JobOutcome::failed(ErrorCode::HandlerFailure, "boom")));
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.completed_at.is_some());
        assert_eq!(record.result, Some(json!({"error": "boom", "code": "HANDLER_FAILURE"})));
    }

    #[test]
    fn test_only_lifecycle_transitions_are_allowed() {
        assert!(Transition::start().ensure_allowed().is_ok());
        assert!(Transition::finish(JobOutcome::Completed(json!({}))).ensure_allowed().is_ok());

        let rewind = Transition {
            from: JobStatus::Completed,
            to: JobStatus::Pending,
            at: Utc::now(),
            result: None,
        };
        let err = rewind.ensure_allowed().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    }
}
