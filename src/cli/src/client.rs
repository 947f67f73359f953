//! HTTP client for the taskq API server.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error body returned by the server on any non-2xx response.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

/// Failure reported by the API, as opposed to a transport error.
#[derive(Debug, thiserror::Error)]
#[error("{message} ({code}, HTTP {status})")]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// HTTP client for the taskq API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a GET request and deserialize the response body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        decode(resp, &url).await
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        decode(resp, &url).await
    }

    /// GET returning the JSON body regardless of status.
    ///
    /// `/health` answers 503 with a full report when a component is down.
    pub async fn get_raw(&self, path: &str) -> Result<(u16, serde_json::Value)> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = resp.status().as_u16();
        let body = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;
        Ok((status, body))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => ApiError {
                status: status.as_u16(),
                code: body.error.code,
                message: body.error.message,
            }
            .into(),
            Err(_) => anyhow::anyhow!("API error ({}): {}", status, text),
        });
    }

    resp.json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_decodes_bare_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "PENDING"})))
            .mount(&server)
            .await;

        let client = ApiClient::new(&format!("{}/", server.uri())).unwrap();
        let body: serde_json::Value = client.get("/tasks/abc").await.unwrap();
        assert_eq!(body["status"], "PENDING");
    }

    #[tokio::test]
    async fn test_error_body_becomes_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/nope"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": {"code": "INVALID_IDENTIFIER", "numeric_code": 1001, "message": "Invalid Task ID format."}
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client.get::<serde_json::Value>("/tasks/nope").await.unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.status, 400);
        assert_eq!(api.code, "INVALID_IDENTIFIER");
        assert_eq!(api.message, "Invalid Task ID format.");
    }

    #[tokio::test]
    async fn test_get_raw_keeps_unhealthy_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"status": "unhealthy"})))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let (status, body) = client.get_raw("/health").await.unwrap();
        assert_eq!(status, 503);
        assert_eq!(body["status"], "unhealthy");
    }
}
