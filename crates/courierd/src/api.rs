//! HTTP API: request submission, queue control, health checks and metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use courier_lib::{
    connectivity::ManualConnectivity,
    error::QUEUED_FOR_LATER_MESSAGE,
    health::{ComponentStatus, HealthRegistry},
    ApiRequest, CourierError, CourierMetrics, ErrorKind, Method, Priority, RequestClient,
    SendOptions, SendOutcome,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<RequestClient>,
    pub connectivity: Arc<ManualConnectivity>,
    pub health_registry: HealthRegistry,
    pub metrics: CourierMetrics,
}

impl AppState {
    pub fn new(
        client: Arc<RequestClient>,
        connectivity: Arc<ManualConnectivity>,
        health_registry: HealthRegistry,
        metrics: CourierMetrics,
    ) -> Self {
        Self {
            client,
            connectivity,
            health_registry,
            metrics,
        }
    }
}

/// Body of `POST /v1/requests`
#[derive(Debug, Deserialize)]
pub struct SendRequestBody {
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub cache_key: Option<String>,
    #[serde(default)]
    pub skip_queue_on_offline: bool,
    #[serde(default)]
    pub skip_retry: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub caller_config: Option<Value>,
}

impl SendRequestBody {
    fn into_parts(self) -> (ApiRequest, SendOptions) {
        let request = ApiRequest {
            method: self.method,
            url: self.url,
            payload: self.payload,
            headers: self.headers,
            caller_config: self.caller_config,
        };
        let options = SendOptions {
            priority: self.priority,
            cache_key: self.cache_key,
            skip_queue_on_offline: self.skip_queue_on_offline,
            skip_retry: self.skip_retry,
            timeout_ms: self.timeout_ms,
        };
        (request, options)
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectivityBody {
    pub online: bool,
}

/// Status returned to callers for a classified delivery failure
fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Network | ErrorKind::ServerError | ErrorKind::Unknown => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn error_response(err: CourierError) -> Response {
    match err {
        CourierError::Request(outcome) => {
            let body = json!({
                "error": {
                    "kind": outcome.kind,
                    "message": outcome.user_message,
                    "status": outcome.http_status,
                    "retryable": outcome.retryable,
                }
            });
            (status_for(outcome.kind), Json(body)).into_response()
        }
        other => {
            error!(error = %other, "Request handling failed");
            let body = json!({
                "error": {
                    "kind": "internal",
                    "message": other.to_string(),
                    "retryable": false,
                }
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Health check response - 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.health_registry.refresh(&state.client).await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.health_registry.refresh(&state.client).await;
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn send_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendRequestBody>,
) -> Response {
    let (request, options) = body.into_parts();

    match state.client.send(request, options).await {
        Ok(SendOutcome::Completed { body }) => (
            StatusCode::OK,
            Json(json!({"status": "completed", "body": body})),
        )
            .into_response(),
        Ok(SendOutcome::Queued { request_id }) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "queued",
                "request_id": request_id,
                "message": QUEUED_FOR_LATER_MESSAGE,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn queue_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.client.get_queue_status())
}

async fn clear_queue(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cleared = state.client.get_queue_status().queue.length;
    state.client.clear_queue();
    Json(json!({"cleared": cleared}))
}

async fn sync(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = match state.client.sync_now().await {
        Some(summary) => json!({
            "started": true,
            "success": summary.success,
            "failure": summary.failure,
        }),
        None => json!({"started": false, "success": 0, "failure": 0}),
    };
    Json(body)
}

async fn set_connectivity(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConnectivityBody>,
) -> impl IntoResponse {
    let was_online = state.client.is_online();
    state.connectivity.transition(body.online);
    let online = state.client.is_online();

    if was_online != online {
        info!(online, "Connectivity transition reported");
    }

    Json(json!({"online": online, "changed": was_online != online}))
}

async fn invalidate_cache(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.client.invalidate_cache(None);
    StatusCode::NO_CONTENT
}

async fn invalidate_cache_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    state.client.invalidate_cache(Some(&key));
    StatusCode::NO_CONTENT
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "client": state.client.stats(),
        "cache": state.client.cache_stats(),
        "sync": state.client.sync_stats(),
        "sync_state": state.client.engine().state(),
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/requests", post(send_request))
        .route("/v1/queue", get(queue_status).delete(clear_queue))
        .route("/v1/sync", post(sync))
        .route("/v1/connectivity", post(set_connectivity))
        .route("/v1/cache", delete(invalidate_cache))
        .route("/v1/cache/:key", delete(invalidate_cache_key))
        .route("/v1/stats", get(stats))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
