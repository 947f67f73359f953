//! Built-in tasks.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;

use super::registry::{HandlerError, TaskHandler};

fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, HandlerError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| HandlerError::missing_param(name, "non-empty string"))
}

/// Task: return the params unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTask;

#[async_trait]
impl TaskHandler for EchoTask {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn execute(&self, params: &Value) -> Result<Value, HandlerError> {
        Ok(params.clone())
    }
}

/// Task: fetch a URL and report its status code and page title.
///
/// Params: `{"url": "https://example.com"}`.
#[derive(Debug, Clone)]
pub struct ScanUrlTask {
    client: reqwest::Client,
}

impl ScanUrlTask {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Build with a per-request HTTP timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("taskq-scan/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for ScanUrlTask {
    fn default() -> Self {
        Self::new()
    }
}

fn title_pattern() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"))
}

fn extract_title(body: &str) -> Option<String> {
    title_pattern()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl TaskHandler for ScanUrlTask {
    fn name(&self) -> &'static str {
        "scan_url"
    }

    async fn execute(&self, params: &Value) -> Result<Value, HandlerError> {
        let raw = required_str(params, "url")?;
        let url = reqwest::Url::parse(raw)
            .map_err(|e| HandlerError::new(format!("invalid url '{}': {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HandlerError::new(format!("unsupported url scheme '{}'", url.scheme())));
        }

        tracing::debug!(url = %url, "Scanning URL");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HandlerError::new(format!("request failed: {}", e)))?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| HandlerError::new(format!("failed to read body: {}", e)))?;

        Ok(json!({
            "url": final_url,
            "status_code": status_code,
            "title": extract_title(&body),
            "content_length": body.len(),
        }))
    }
}

/// Task: resolve a hostname to its IP addresses.
///
/// Params: `{"hostname": "example.com"}`. IPv4 addresses are listed first.
#[derive(Debug, Clone, Default)]
pub struct FetchIpTask;

impl FetchIpTask {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for FetchIpTask {
    fn name(&self) -> &'static str {
        "fetch_ip"
    }

    async fn execute(&self, params: &Value) -> Result<Value, HandlerError> {
        let hostname = required_str(params, "hostname")?;

        let mut addresses: Vec<IpAddr> = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| HandlerError::new(format!("failed to resolve '{}': {}", hostname, e)))?
            .map(|addr| addr.ip())
            .collect();
        addresses.sort_by_key(|ip| (ip.is_ipv6(), *ip));
        addresses.dedup();

        let Some(first) = addresses.first() else {
            return Err(HandlerError::new(format!("no addresses found for '{}'", hostname)));
        };

        Ok(json!({
            "hostname": hostname,
            "ip_address": first.to_string(),
            "addresses": addresses.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }))
    }
}
