//! Integration tests for the daemon API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_lib::{
    connectivity::{ConnectivityMonitor, ManualConnectivity},
    error::StorageError,
    health::{components, HealthRegistry},
    queue::Storage,
    retry::BackoffPolicy,
    CourierMetrics, RequestClient,
};
use courierd::api::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Nothing listens on the discard port, so every upstream attempt fails fast
const UNREACHABLE_UPSTREAM: &str = "http://127.0.0.1:9";

/// Storage that rejects every write
struct ReadOnlyStorage;

impl Storage for ReadOnlyStorage {
    fn load(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    fn save(&self, _key: &str, _bytes: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        )))
    }

    fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

async fn setup_test_app(online: bool) -> (Router, Arc<AppState>) {
    setup_test_app_with_storage(online, None).await
}

async fn setup_test_app_with_storage(
    online: bool,
    storage: Option<Arc<dyn Storage>>,
) -> (Router, Arc<AppState>) {
    let source = Arc::new(ManualConnectivity::new(online));
    let connectivity = ConnectivityMonitor::from_source(source.as_ref());
    let metrics = CourierMetrics::new();

    let mut builder = RequestClient::builder();
    if let Some(storage) = storage {
        builder = builder.storage(storage);
    }
    let client = builder
        .base_url(UNREACHABLE_UPSTREAM)
        .connectivity(connectivity)
        .request_timeout(Duration::from_secs(2))
        .backoff(BackoffPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            jitter_factor: 0.0,
        })
        .metrics(metrics.clone())
        .build()
        .unwrap();

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let state = Arc::new(AppState::new(
        Arc::new(client),
        source,
        health_registry,
        metrics,
    ));
    (create_router(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_healthz_reports_degraded_when_offline() {
    let (app, _state) = setup_test_app(false).await;

    let (status, health) = call(&app, "GET", "/healthz", None).await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["connectivity"]["status"], "degraded");
    assert_eq!(health["components"]["queue"]["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_healthy_when_online() {
    let (app, _state) = setup_test_app(true).await;

    let (status, health) = call(&app, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["sync_engine"].is_object());
}

#[tokio::test]
async fn test_healthz_unavailable_when_queue_cannot_persist() {
    let storage: Arc<dyn Storage> = Arc::new(ReadOnlyStorage);
    let (app, state) = setup_test_app_with_storage(false, Some(storage)).await;
    state.health_registry.set_ready(true).await;

    for i in 0..3 {
        call(
            &app,
            "POST",
            "/v1/requests",
            Some(json!({"method": "POST", "url": format!("/api/items/{}", i)})),
        )
        .await;
    }

    let (status, health) = call(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["components"]["queue"]["status"], "unhealthy");

    let (status, _) = call(&app, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_follows_initialization() {
    let (app, state) = setup_test_app(true).await;

    let (status, readiness) = call(&app, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;

    let (status, readiness) = call(&app, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_offline_request_is_queued() {
    let (app, _state) = setup_test_app(false).await;

    let (status, body) = call(
        &app,
        "POST",
        "/v1/requests",
        Some(json!({
            "method": "POST",
            "url": "/api/projects",
            "payload": {"name": "Test Project"}
        })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert!(body["request_id"].as_str().unwrap().starts_with("req_"));
    assert_eq!(
        body["message"],
        "You are currently offline. Your request has been saved and will be sent when you reconnect."
    );

    let (status, queue) = call(&app, "GET", "/v1/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue["online"], false);
    assert_eq!(queue["length"], 1);
    assert_eq!(queue["capacity"], 100);
    assert_eq!(queue["entries"][0]["url"], "/api/projects");
    assert_eq!(queue["entries"][0]["priority"], "normal");
}

#[tokio::test]
async fn test_clear_queue() {
    let (app, _state) = setup_test_app(false).await;

    for url in ["/api/a", "/auth/login"] {
        call(
            &app,
            "POST",
            "/v1/requests",
            Some(json!({"method": "POST", "url": url})),
        )
        .await;
    }

    let (_, queue) = call(&app, "GET", "/v1/queue", None).await;
    assert_eq!(queue["entries"][0]["url"], "/auth/login");
    assert_eq!(queue["entries"][0]["priority"], "high");

    let (status, body) = call(&app, "DELETE", "/v1/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 2);

    let (_, queue) = call(&app, "GET", "/v1/queue", None).await;
    assert_eq!(queue["length"], 0);
}

#[tokio::test]
async fn test_unreachable_upstream_surfaces_network_error() {
    let (app, _state) = setup_test_app(true).await;

    let (status, body) = call(
        &app,
        "POST",
        "/v1/requests",
        Some(json!({
            "method": "GET",
            "url": "/api/projects",
            "skip_retry": true,
            "skip_queue_on_offline": true
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "network");
    assert_eq!(body["error"]["retryable"], true);
    assert_eq!(
        body["error"]["message"],
        "Network error. Please check your internet connection."
    );
}

#[tokio::test]
async fn test_connectivity_transitions() {
    let (app, _state) = setup_test_app(false).await;

    let (status, body) = call(&app, "POST", "/v1/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], false);

    let (_, body) = call(&app, "POST", "/v1/connectivity", Some(json!({"online": true}))).await;
    assert_eq!(body["online"], true);
    assert_eq!(body["changed"], true);

    let (_, body) = call(&app, "POST", "/v1/connectivity", Some(json!({"online": true}))).await;
    assert_eq!(body["changed"], false);

    let (_, body) = call(&app, "POST", "/v1/sync", None).await;
    assert_eq!(body["started"], true);
    assert_eq!(body["success"], 0);

    let (_, queue) = call(&app, "GET", "/v1/queue", None).await;
    assert_eq!(queue["online"], true);
}

#[tokio::test]
async fn test_cache_invalidation_routes() {
    let (app, _state) = setup_test_app(true).await;

    let (status, _) = call(&app, "DELETE", "/v1/cache/projects", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&app, "DELETE", "/v1/cache", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (app, _state) = setup_test_app(false).await;

    call(
        &app,
        "POST",
        "/v1/requests",
        Some(json!({"method": "DELETE", "url": "/api/projects/1"})),
    )
    .await;

    let (status, stats) = call(&app, "GET", "/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["client"]["total_requests"], 1);
    assert_eq!(stats["client"]["total_failures"], 0);
    assert_eq!(stats["cache"]["entries"], 0);
    assert_eq!(stats["sync"]["drains"], 0);
    assert_eq!(stats["sync_state"], "idle");
}

#[tokio::test]
async fn test_invalid_request_body_rejected() {
    let (app, _state) = setup_test_app(false).await;

    let (status, _) = call(
        &app,
        "POST",
        "/v1/requests",
        Some(json!({"method": "FETCH", "url": "/api/projects"})),
    )
    .await;

    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app(false).await;

    call(
        &app,
        "POST",
        "/v1/requests",
        Some(json!({"method": "POST", "url": "/api/projects"})),
    )
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("courier_queue_length"));
    assert!(metrics_text.contains("courier_requests_total"));
    assert!(metrics_text.contains("courier_online"));
    assert!(metrics_text.contains("courier_request_latency_seconds_bucket"));
}
