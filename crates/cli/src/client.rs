//! API client for the courierd HTTP API

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use url::Url;

/// Failure reported by the daemon
#[derive(Debug, Error)]
pub enum ApiError {
    /// The daemon classified an upstream delivery failure
    #[error("{message} ({kind})")]
    Delivery {
        kind: String,
        message: String,
        upstream_status: Option<u16>,
        retryable: bool,
    },

    #[error("API error ({status}): {body}")]
    Http { status: StatusCode, body: String },
}

/// API client for courierd
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Send the request and turn non-2xx answers into [`ApiError`]
    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => ApiError::Delivery {
                kind: parsed.error.kind,
                message: parsed.error.message,
                upstream_status: parsed.error.status,
                retryable: parsed.error.retryable,
            },
            Err(_) => ApiError::Http { status, body },
        };
        Err(err.into())
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = self.execute(self.client.get(url)).await?;
        response.json().await.context("Failed to parse response")
    }

    /// Make a GET request that tolerates error statuses carrying a JSON body
    ///
    /// Probes answer 503 with a meaningful payload.
    pub async fn probe<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let url = self.url(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;
        let status = response.status();
        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path)?;
        let response = self.execute(self.client.post(url).json(body)).await?;
        response.json().await.context("Failed to parse response")
    }

    /// Make a DELETE request that returns a JSON body
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = self.execute(self.client.delete(url)).await?;
        response.json().await.context("Failed to parse response")
    }

    /// Make a DELETE request that returns no content
    pub async fn delete_empty(&self, path: &str) -> Result<()> {
        let url = self.url(path)?;
        self.execute(self.client.delete(url)).await?;
        Ok(())
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub skip_queue_on_offline: bool,
    pub skip_retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub status: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEntry {
    pub id: String,
    pub method: String,
    pub url: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub online: bool,
    pub syncing: bool,
    pub length: usize,
    pub capacity: usize,
    pub entries: Vec<QueuedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub started: bool,
    pub success: u64,
    pub failure: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityResponse {
    pub online: bool,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    pub total_requests: u64,
    pub total_failures: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStats {
    pub drains: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub client: ClientStats,
    pub cache: CacheStats,
    pub sync: SyncStats,
    pub sync_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_queue_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/queue")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "online": false,
                    "syncing": false,
                    "length": 1,
                    "capacity": 100,
                    "entries": [{
                        "id": "req_1700000000000_abc123xyz",
                        "method": "POST",
                        "url": "/api/projects",
                        "payload": {"name": "Test Project"},
                        "headers": {},
                        "enqueued_at": "2024-01-01T00:00:00Z",
                        "retry_count": 0,
                        "priority": "normal"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status: QueueStatus = client.get("v1/queue").await.unwrap();

        mock.assert_async().await;
        assert!(!status.online);
        assert_eq!(status.length, 1);
        assert_eq!(status.entries[0].url, "/api/projects");
        assert_eq!(status.entries[0].priority, "normal");
    }

    #[tokio::test]
    async fn test_delivery_error_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/requests")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "error": {
                        "kind": "not_found",
                        "message": "The requested resource was not found.",
                        "status": 404,
                        "retryable": false
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let request = SendRequest {
            method: "GET".to_string(),
            url: "/api/missing".to_string(),
            payload: None,
            headers: BTreeMap::new(),
            priority: None,
            cache_key: None,
            skip_queue_on_offline: false,
            skip_retry: false,
            timeout_ms: None,
        };

        let err = client
            .post::<SendResponse, _>("v1/requests", &request)
            .await
            .unwrap_err();

        match err.downcast_ref::<ApiError>() {
            Some(ApiError::Delivery {
                kind,
                upstream_status,
                retryable,
                ..
            }) => {
                assert_eq!(kind, "not_found");
                assert_eq!(*upstream_status, Some(404));
                assert!(!retryable);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plain_error_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/stats")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.get::<StatsResponse>("v1/stats").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Http { status, .. }) if *status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn test_delete_empty_accepts_no_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/v1/cache/projects")
            .with_status(204)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        client.delete_empty("v1/cache/projects").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_probe_keeps_unavailable_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/readyz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ready":false,"reason":"Delivery subsystem not yet initialized"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let (status, readiness): (StatusCode, ReadinessResponse) =
            client.probe("readyz").await.unwrap();

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!readiness.ready);
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
