//! Transport boundary
//!
//! The delivery subsystem never talks HTTP directly. It hands a
//! [`TransportRequest`] to a [`Transport`] and classifies what comes back.
//! [`HttpTransport`] is the production implementation on top of reqwest.

use crate::error::{CourierError, CourierResult, RetryOutcome};
use crate::models::{ApiRequest, Method, QueuedRequest};
use crate::observability::CourierMetrics;
use crate::retry::{classify, RawOutcome};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// One attempt, fully resolved
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub payload: Option<Value>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn from_api(request: &ApiRequest, timeout: Duration) -> Self {
        Self {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            payload: request.payload.clone(),
            timeout,
        }
    }

    /// Build from a queued entry, honoring its own timeout override
    pub fn from_queued(request: &QueuedRequest, default_timeout: Duration) -> Self {
        Self {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            payload: request.payload.clone(),
            timeout: request.timeout().unwrap_or(default_timeout),
        }
    }
}

/// A response that arrived, whatever its status
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An attempt that produced no usable response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No response: {0}")]
    NoResponse(String),

    #[error("Request timed out")]
    TimedOut,

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn raw(&self) -> RawOutcome {
        match self {
            TransportError::NoResponse(_) => RawOutcome::NoResponse,
            TransportError::TimedOut => RawOutcome::TimedOut,
            TransportError::Malformed(_) => RawOutcome::Malformed,
        }
    }
}

/// Executes a single request attempt
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &TransportRequest)
        -> Result<TransportResponse, TransportError>;
}

/// Supplies the bearer token for each attempt
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `None` omits the Authorization header
    async fn token(&self) -> Option<String>;
}

/// Token fixed at construction
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    base_url: Option<Url>,
}

impl HttpTransport {
    /// Relative request URLs are resolved against `base_url`
    pub fn new(base_url: Option<&str>) -> CourierResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| CourierError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| CourierError::Config(format!("Invalid base URL {}: {}", raw, e)))
            })
            .transpose()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    fn resolve(&self, url: &str) -> Result<Url, TransportError> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .as_ref()
                .ok_or_else(|| {
                    TransportError::Malformed(format!("Relative URL without base: {}", url))
                })?
                .join(url)
                .map_err(|e| TransportError::Malformed(format!("Invalid URL {}: {}", url, e))),
            Err(e) => Err(TransportError::Malformed(format!(
                "Invalid URL {}: {}",
                url, e
            ))),
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.resolve(&request.url)?;

        let mut builder = self
            .client
            .request(reqwest_method(request.method), url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::TimedOut
            } else {
                TransportError::NoResponse(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::TimedOut
            } else {
                TransportError::Malformed(e.to_string())
            }
        })?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(TransportResponse { status, body })
    }
}

/// Runs classified attempts: default headers, auth, deadline and latency
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    tokens: Option<Arc<dyn TokenProvider>>,
    default_headers: BTreeMap<String, String>,
    metrics: Option<CourierMetrics>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            transport,
            tokens: None,
            default_headers,
            metrics: None,
        }
    }

    pub fn with_token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_default_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        for (name, value) in headers {
            replace_header(&mut self.default_headers, &name, value);
        }
        self
    }

    pub fn with_metrics(mut self, metrics: CourierMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Execute one attempt. Any non-2xx status, transport error or expired
    /// deadline comes back classified.
    pub async fn attempt(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, RetryOutcome> {
        let mut prepared = request.clone();
        for (name, value) in &self.default_headers {
            let present = prepared
                .headers
                .keys()
                .any(|existing| existing.eq_ignore_ascii_case(name));
            if !present {
                prepared.headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(tokens) = &self.tokens {
            if let Some(token) = tokens.token().await {
                replace_header(
                    &mut prepared.headers,
                    "Authorization",
                    format!("Bearer {}", token),
                );
            }
        }

        let start = Instant::now();
        let result =
            tokio::time::timeout(prepared.timeout, self.transport.execute(&prepared)).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_request_latency(start.elapsed().as_secs_f64());
        }

        let outcome = match result {
            Err(_) => Err(classify(RawOutcome::TimedOut)),
            Ok(Err(e)) => {
                debug!(url = %prepared.url, error = %e, "Transport attempt failed");
                Err(classify(e.raw()))
            }
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(classify(RawOutcome::Status(response.status))),
        };

        if let Err(outcome) = &outcome {
            debug!(
                method = %prepared.method,
                url = %prepared.url,
                kind = %outcome.kind,
                retryable = outcome.retryable,
                "Attempt classified as failure"
            );
        }
        outcome
    }
}

/// Header names are case-insensitive; drop every spelling of `name` first
fn replace_header(headers: &mut BTreeMap<String, String>, name: &str, value: String) {
    headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sync::mock::{MockReply, MockTransport};
    use serde_json::json;

    fn request(url: &str) -> TransportRequest {
        TransportRequest::from_api(&ApiRequest::get(url), Duration::from_millis(200))
    }

    #[test]
    fn test_relative_url_resolution() {
        let transport = HttpTransport::new(Some("https://api.example.com/")).unwrap();
        assert_eq!(
            transport.resolve("api/projects").unwrap().as_str(),
            "https://api.example.com/api/projects"
        );
        assert_eq!(
            transport.resolve("https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );

        let bare = HttpTransport::new(None).unwrap();
        assert!(matches!(
            bare.resolve("/api/projects"),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        assert!(matches!(
            HttpTransport::new(Some("not a url")),
            Err(CourierError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatcher_adds_default_and_auth_headers() {
        let transport = Arc::new(MockTransport::new());
        let dispatcher = Dispatcher::new(transport.clone())
            .with_token_provider(Arc::new(StaticToken::new("test-token")));

        dispatcher.attempt(&request("/api/users")).await.unwrap();

        let seen = transport.requests();
        assert_eq!(seen[0].headers["Content-Type"], "application/json");
        assert_eq!(seen[0].headers["Authorization"], "Bearer test-token");
    }

    #[tokio::test]
    async fn test_caller_headers_win_regardless_of_case() {
        let transport = Arc::new(MockTransport::new());
        let dispatcher = Dispatcher::new(transport.clone())
            .with_token_provider(Arc::new(StaticToken::new("fresh")));

        let mut req = request("/api/upload");
        req.headers
            .insert("content-type".to_string(), "text/plain".to_string());
        req.headers
            .insert("authorization".to_string(), "Bearer stale".to_string());
        dispatcher.attempt(&req).await.unwrap();

        let headers = &transport.requests()[0].headers;
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["content-type"], "text/plain");
        assert_eq!(headers["Authorization"], "Bearer fresh");
    }

    #[tokio::test]
    async fn test_configured_defaults_replace_builtin_spelling() {
        let transport = Arc::new(MockTransport::new());
        let mut defaults = BTreeMap::new();
        defaults.insert(
            "content-type".to_string(),
            "application/vnd.api+json".to_string(),
        );
        let dispatcher = Dispatcher::new(transport.clone()).with_default_headers(defaults);

        dispatcher.attempt(&request("/api/users")).await.unwrap();

        let headers = &transport.requests()[0].headers;
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["content-type"], "application/vnd.api+json");
    }

    #[tokio::test]
    async fn test_dispatcher_omits_missing_token() {
        let transport = Arc::new(MockTransport::new());
        let dispatcher =
            Dispatcher::new(transport.clone()).with_token_provider(Arc::new(StaticToken::none()));

        dispatcher.attempt(&request("/public")).await.unwrap();

        assert!(!transport.requests()[0].headers.contains_key("Authorization"));
    }

    #[tokio::test]
    async fn test_dispatcher_classifies_failures() {
        let transport = Arc::new(MockTransport::scripted(vec![
            MockReply::status(503, json!({"error": "unavailable"})),
            MockReply::NoResponse,
            MockReply::Hang,
        ]));
        let dispatcher = Dispatcher::new(transport);

        let server = dispatcher.attempt(&request("/a")).await.unwrap_err();
        assert_eq!(server.kind, ErrorKind::ServerError);
        assert_eq!(server.http_status, Some(503));

        let network = dispatcher.attempt(&request("/b")).await.unwrap_err();
        assert_eq!(network.kind, ErrorKind::Network);

        let timeout = dispatcher.attempt(&request("/c")).await.unwrap_err();
        assert_eq!(timeout.kind, ErrorKind::Timeout);
    }

    mod http_transport {
        use super::*;

        fn transport_for(server: &mockito::Server) -> HttpTransport {
            HttpTransport::new(Some(server.url().as_str())).unwrap()
        }

        #[tokio::test]
        async fn test_json_body_and_status() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("POST", "/api/projects")
                .match_header("x-trace", "abc")
                .match_body(mockito::Matcher::Json(json!({"name": "Test Project"})))
                .with_status(201)
                .with_header("content-type", "application/json")
                .with_body(r#"{"id":1,"name":"Test Project"}"#)
                .create_async()
                .await;

            let mut req = TransportRequest::from_api(
                &ApiRequest::post("/api/projects", json!({"name": "Test Project"})),
                Duration::from_secs(5),
            );
            req.headers.insert("x-trace".to_string(), "abc".to_string());

            let response = transport_for(&server).execute(&req).await.unwrap();

            mock.assert_async().await;
            assert_eq!(response.status, 201);
            assert_eq!(response.body, json!({"id": 1, "name": "Test Project"}));
        }

        #[tokio::test]
        async fn test_empty_body_is_null() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("DELETE", "/api/projects/1")
                .with_status(204)
                .create_async()
                .await;

            let req = TransportRequest::from_api(
                &ApiRequest::new(Method::Delete, "/api/projects/1"),
                Duration::from_secs(5),
            );
            let response = transport_for(&server).execute(&req).await.unwrap();

            assert_eq!(response.status, 204);
            assert_eq!(response.body, Value::Null);
        }

        #[tokio::test]
        async fn test_non_json_body_is_string() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", "/status")
                .with_status(502)
                .with_body("Bad Gateway")
                .create_async()
                .await;

            let response = transport_for(&server)
                .execute(&request("/status"))
                .await
                .unwrap();

            assert_eq!(response.status, 502);
            assert!(!response.is_success());
            assert_eq!(response.body, Value::String("Bad Gateway".to_string()));
        }

        #[tokio::test]
        async fn test_unanswered_request_times_out() {
            // Accepts connections but never writes a response
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let _server = tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            });

            let transport = HttpTransport::new(Some(format!("http://{}", addr).as_str())).unwrap();
            let req = TransportRequest::from_api(
                &ApiRequest::get("/slow"),
                Duration::from_millis(100),
            );

            let err = transport.execute(&req).await.unwrap_err();
            assert!(matches!(err, TransportError::TimedOut));
        }

        #[tokio::test]
        async fn test_refused_connection_is_no_response() {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let transport = HttpTransport::new(Some(format!("http://{}", addr).as_str())).unwrap();
            let err = transport
                .execute(&request("/api/projects"))
                .await
                .unwrap_err();
            assert!(matches!(err, TransportError::NoResponse(_)));
        }
    }
}
