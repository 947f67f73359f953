//! Health check command.
//!
//! Queries the `/health` endpoint and displays component status.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Debug, Deserialize, Serialize)]
struct HealthReport {
    status: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    uptime_secs: Option<u64>,
    #[serde(default)]
    components: Vec<Component>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Component {
    name: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    latency_ms: Option<u64>,
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&Component> for ComponentRow {
    fn from(c: &Component) -> Self {
        Self {
            name: c.name.clone(),
            status: output::colorize_status(&c.status).to_string(),
            latency: c.latency_ms.map(|ms| format!("{}ms", ms)).unwrap_or_default(),
            message: c.message.clone().unwrap_or_default(),
        }
    }
}

/// Returns an error when the server reports itself unhealthy, so scripts can
/// rely on the exit code.
pub async fn execute(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (code, body) = client.get_raw("/health").await?;

    if format != OutputFormat::Table {
        output::print_item(&body, format)?;
    } else {
        let report: HealthReport = serde_json::from_value(body)?;
        output::print_header("System Health");
        output::print_detail("Status", &output::colorize_status(&report.status).to_string());
        output::print_detail("API URL", client.base_url());
        if let Some(version) = &report.version {
            output::print_detail("Version", version);
        }
        if let Some(uptime) = report.uptime_secs {
            output::print_detail(
                "Uptime",
                &humantime::format_duration(std::time::Duration::from_secs(uptime)).to_string(),
            );
        }
        if !report.components.is_empty() {
            let rows: Vec<ComponentRow> = report.components.iter().map(ComponentRow::from).collect();
            println!();
            println!("{}", output::render_table(&rows));
        }
    }

    if code >= 500 {
        anyhow::bail!("Service unavailable (HTTP {})", code);
    }
    if format == OutputFormat::Table {
        output::print_success("All systems operational");
    }
    Ok(())
}
