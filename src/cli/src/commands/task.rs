//! Task commands: submit, status and wait.

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tabled::Tabled;
use uuid::Uuid;

use super::config;
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct SubmitArgs {
    /// Registered task name (e.g. echo, fetch_ip, scan_url)
    pub task_name: String,

    /// Task parameters as a JSON object
    #[arg(short, long, conflicts_with = "params_file")]
    pub params: Option<String>,

    /// Read task parameters from a JSON file
    #[arg(long)]
    pub params_file: Option<String>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Task ID
    pub task_id: Uuid,
}

#[derive(Args)]
pub struct WaitArgs {
    /// Task ID
    pub task_id: Uuid,

    /// Delay between status polls [default: wait-interval setting, else 1s]
    #[arg(long, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Give up after this long [default: wait-timeout setting, else 60s]
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
}

const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Flag, then stored setting, then built-in default.
fn resolve_duration(flag: Option<Duration>, stored: Option<String>, default: Duration) -> Duration {
    flag.or_else(|| stored.and_then(|s| humantime::parse_duration(&s).ok()))
        .unwrap_or(default)
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SubmitTaskRequest {
    task_name: String,
    params: Value,
}

#[derive(Debug, Deserialize, Serialize)]
struct SubmitTaskResponse {
    task_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub task_name: String,
    pub status: String,
    pub submitted_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub result: Option<Value>,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "COMPLETED" | "FAILED")
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn status_rows(status: &TaskStatus) -> Vec<StatusRow> {
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    vec![
        StatusRow { field: "ID", value: status.id.clone() },
        StatusRow { field: "Task", value: status.task_name.clone() },
        StatusRow { field: "Status", value: output::colorize_status(&status.status).to_string() },
        StatusRow { field: "Submitted", value: status.submitted_at.clone() },
        StatusRow { field: "Started", value: or_dash(&status.started_at) },
        StatusRow { field: "Completed", value: or_dash(&status.completed_at) },
        StatusRow {
            field: "Result",
            value: status
                .result
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
        },
    ]
}

fn print_status(status: &TaskStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", output::render_table(&status_rows(status)));
            Ok(())
        }
        _ => output::print_item(status, format),
    }
}

/// Resolve the parameters object from `--params`, `--params-file` or neither.
pub fn read_params(inline: Option<&str>, file: Option<&str>) -> Result<Value> {
    let raw = match (inline, file) {
        (Some(json), _) => json.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read params file: {}", path))?,
        (None, None) => return Ok(Value::Object(Default::default())),
    };
    let params: Value = serde_json::from_str(&raw).context("params must be valid JSON")?;
    if !params.is_object() {
        anyhow::bail!("params must be a JSON object");
    }
    Ok(params)
}

fn task_path(task_id: &Uuid) -> String {
    format!("/tasks/{}", task_id.as_hyphenated())
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn submit(args: SubmitArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let params = read_params(args.params.as_deref(), args.params_file.as_deref())?;
    let body = SubmitTaskRequest {
        task_name: args.task_name.clone(),
        params,
    };

    let resp: SubmitTaskResponse = client.post("/tasks", &body).await?;

    match format {
        OutputFormat::Table => {
            output::print_success("Task accepted");
            output::print_detail("Task ID", &resp.task_id);
            output::print_detail("Task", &args.task_name);
        }
        _ => output::print_item(&resp, format)?,
    }
    Ok(())
}

pub async fn status(args: StatusArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: TaskStatus = client.get(&task_path(&args.task_id)).await?;
    print_status(&status, format)
}

pub async fn wait(args: WaitArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let spinner = (format == OutputFormat::Table).then(|| {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {wide_msg}") {
            bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    });

    let interval = resolve_duration(
        args.interval,
        config::load_value("wait-interval"),
        DEFAULT_WAIT_INTERVAL,
    );
    let timeout = resolve_duration(
        args.timeout,
        config::load_value("wait-timeout"),
        DEFAULT_WAIT_TIMEOUT,
    );

    let started = Instant::now();
    let path = task_path(&args.task_id);
    let outcome = loop {
        let status: TaskStatus = match client.get(&path).await {
            Ok(status) => status,
            Err(e) => break Err(e),
        };
        if let Some(bar) = &spinner {
            bar.set_message(format!("{} is {}", args.task_id, status.status));
        }
        if status.is_terminal() {
            break Ok(status);
        }
        if started.elapsed() >= timeout {
            break Err(anyhow::anyhow!(
                "Task {} still {} after {}",
                args.task_id,
                status.status,
                humantime::format_duration(timeout)
            ));
        }
        tokio::time::sleep(interval).await;
    };

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    let status = outcome?;
    print_status(&status, format)?;
    if status.status == "FAILED" {
        anyhow::bail!("Task {} failed", status.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_read_params_sources() {
        assert_eq!(read_params(None, None).unwrap(), json!({}));
        assert_eq!(read_params(Some(r#"{"x": 1}"#), None).unwrap(), json!({"x": 1}));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"url": "https://example.com"}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert_eq!(
            read_params(None, Some(&path)).unwrap(),
            json!({"url": "https://example.com"})
        );
    }

    #[test]
    fn test_read_params_rejects_non_objects() {
        assert!(read_params(Some("[1, 2]"), None).is_err());
        assert!(read_params(Some("not json"), None).is_err());
        assert!(read_params(None, Some("/nonexistent/params.json")).is_err());
    }

    #[test]
    fn test_wait_durations_prefer_flag_then_setting() {
        let flag = Some(Duration::from_secs(5));
        assert_eq!(resolve_duration(flag, Some("2m".into()), DEFAULT_WAIT_TIMEOUT), Duration::from_secs(5));
        assert_eq!(resolve_duration(None, Some("2m".into()), DEFAULT_WAIT_TIMEOUT), Duration::from_secs(120));
        assert_eq!(resolve_duration(None, Some("soon".into()), DEFAULT_WAIT_TIMEOUT), DEFAULT_WAIT_TIMEOUT);
        assert_eq!(resolve_duration(None, None, DEFAULT_WAIT_INTERVAL), DEFAULT_WAIT_INTERVAL);
    }

    #[test]
    fn test_task_path_is_canonical_uuid() {
        let id: Uuid = "6F9619FF-8B86-D011-B42D-00CF4FC964FF".parse().unwrap();
        assert_eq!(task_path(&id), "/tasks/6f9619ff-8b86-d011-b42d-00cf4fc964ff");
    }

    #[test]
    fn test_terminal_statuses() {
        let mut status: TaskStatus = serde_json::from_value(json!({
            "id": "a", "task_name": "echo", "status": "IN_PROGRESS",
            "submitted_at": "2026-01-01T00:00:00Z", "started_at": null,
            "completed_at": null, "result": null
        }))
        .unwrap();
        assert!(!status.is_terminal());
        status.status = "FAILED".to_string();
        assert!(status.is_terminal());
        assert_eq!(status_rows(&status).len(), 7);
    }
}
