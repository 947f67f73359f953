//! Task registry and dispatcher.
//!
//! Each task is a [`TaskHandler`] with a single `execute` operation. The
//! [`TaskRegistry`] maps task names to handlers; it is built once at startup
//! and never changes afterwards.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::job::JobOutcome;
use crate::error::ErrorCode;

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// A required parameter was absent or had the wrong type.
    pub fn missing_param(name: &str, expected: &str) -> Self {
        Self::new(format!("missing or invalid parameter '{}' (expected {})", name, expected))
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

/// An executable capability registered under a task name.
///
/// Handlers are trusted and run inline on the worker loop that dequeued the
/// job; no timeout is applied.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task name this handler is registered under.
    fn name(&self) -> &'static str;

    /// Run the task against the envelope's params.
    async fn execute(&self, params: &serde_json::Value) -> Result<serde_json::Value, HandlerError>;
}

/// Immutable name → handler mapping.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    /// Registry with every built-in task.
    pub fn with_builtins() -> Self {
        Self::builder()
            .register(super::builtin::EchoTask)
            .register(super::builtin::ScanUrlTask::new())
            .register(super::builtin::FetchIpTask::new())
            .build()
    }

    pub fn resolve(&self, task_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_name).cloned()
    }

    pub fn contains(&self, task_name: &str) -> bool {
        self.handlers.contains_key(task_name)
    }

    /// Registered task names, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve and run a task, turning every failure mode into a terminal outcome.
    ///
    /// An unregistered name never invokes anything. Handler errors and panics
    /// are captured here so they cannot take the worker loop down.
    pub async fn dispatch(&self, task_name: &str, params: &serde_json::Value) -> JobOutcome {
        let Some(handler) = self.resolve(task_name) else {
            return JobOutcome::failed(
                ErrorCode::UnregisteredTask,
                format!("Task name '{}' not found in registry.", task_name),
            );
        };

        match AssertUnwindSafe(handler.execute(params)).catch_unwind().await {
            Ok(Ok(value)) => JobOutcome::Completed(value),
            Ok(Err(err)) => JobOutcome::failed(ErrorCode::HandlerFailure, err.message),
            Err(panic) => JobOutcome::failed(
                ErrorCode::HandlerFailure,
                format!("handler panicked: {}", panic_message(&panic)),
            ),
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.task_names())
            .finish()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Collects handlers before the registry is frozen.
#[derive(Default)]
pub struct TaskRegistryBuilder {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistryBuilder {
    /// Register a handler under its own name. A later registration with the
    /// same name replaces the earlier one.
    pub fn register<H: TaskHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.name().to_string(), Arc::new(handler));
        self
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::builtin::EchoTask;
    use serde_json::json;

    struct Failing;

    #[async_trait]
    impl TaskHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn execute(&self, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerError> {
            Err(HandlerError::new("disk full"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl TaskHandler for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn execute(&self, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerError> {
            panic!("index out of bounds")
        }
    }

    fn registry() -> TaskRegistry {
        TaskRegistry::builder()
            .register(EchoTask)
            .register(Failing)
            .register(Panicking)
            .build()
    }

    #[tokio::test]
    async fn test_dispatch_completed() {
        let outcome = registry().dispatch("echo", &json!({"x": 1})).await;
        assert_eq!(outcome, JobOutcome::Completed(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_dispatch_unregistered_names_task() {
        let outcome = registry().dispatch("resize_image", &json!({})).await;
        assert_eq!(
            outcome,
            JobOutcome::Failed(json!({
                "error": "Task name 'resize_image' not found in registry.",
                "code": "UNREGISTERED_TASK"
            }))
        );
    }

    #[tokio::test]
    async fn test_dispatch_handler_error() {
        let outcome = registry().dispatch("failing", &json!({})).await;
        assert_eq!(outcome, JobOutcome::Failed(json!({"error": "disk full", "code": "HANDLER_FAILURE"})));
    }

    #[tokio::test]
    async fn test_dispatch_handler_panic_is_captured() {
        let outcome = registry().dispatch("panicking", &json!({})).await;
        assert_eq!(
            outcome,
            JobOutcome::Failed(json!({
                "error": "handler panicked: index out of bounds",
                "code": "HANDLER_FAILURE"
            }))
        );
    }

    #[test]
    fn test_resolution_is_stable() {
        let registry = registry();
        let first = registry.resolve("echo").unwrap();
        let second = registry.clone().resolve("echo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.task_names(), vec!["echo", "failing", "panicking"]);
    }

    #[test]
    fn test_builtins_registered() {
        let registry = TaskRegistry::with_builtins();
        assert!(registry.contains("echo"));
        assert!(registry.contains("scan_url"));
        assert!(registry.contains("fetch_ip"));
    }
}
