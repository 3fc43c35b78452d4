//! Health tracking for the delivery subsystem
//!
//! Component status is derived from live subsystem state by
//! [`HealthRegistry::refresh`] and served by the daemon's liveness and
//! readiness probes.

use crate::client::RequestClient;
use crate::sync::SyncState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Queue fill ratio at which the queue reports degraded
const QUEUE_DEGRADED_RATIO: f64 = 0.9;

/// Consecutive failed snapshot saves after which the queue is unhealthy
const STORAGE_UNHEALTHY_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Operating, but callers are affected
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst component status wins
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max_by_key(|status| match status {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const CONNECTIVITY: &str = "connectivity";
    pub const QUEUE: &str = "queue";
    pub const SYNC_ENGINE: &str = "sync_engine";

    pub const ALL: [&str; 3] = [CONNECTIVITY, QUEUE, SYNC_ENGINE];
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Re-derive every component's status from the client's current state
    pub async fn refresh(&self, client: &RequestClient) {
        let connectivity = if client.is_online() {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::degraded("Offline, requests are being queued")
        };

        let status = client.get_queue_status();
        let fill = status.queue.length as f64 / status.queue.capacity.max(1) as f64;
        let save_failures = client.queue_save_failures();
        let queue = if save_failures >= STORAGE_UNHEALTHY_FAILURES {
            ComponentHealth::unhealthy(format!(
                "Queue persistence failing ({} consecutive save errors)",
                save_failures
            ))
        } else if fill >= QUEUE_DEGRADED_RATIO {
            ComponentHealth::degraded(format!(
                "Queue at {}/{}, oldest low-priority requests will be evicted",
                status.queue.length, status.queue.capacity
            ))
        } else {
            ComponentHealth::healthy()
        };

        let engine = match client.engine().state() {
            SyncState::Idle | SyncState::Draining => ComponentHealth::healthy(),
            SyncState::StoppedOffline if status.queue.length > 0 => {
                ComponentHealth::degraded("Drain paused until connectivity returns")
            }
            SyncState::StoppedOffline => ComponentHealth::healthy(),
        };

        let mut components = self.components.write().await;
        components.insert(components::CONNECTIVITY.to_string(), connectivity);
        components.insert(components::QUEUE.to_string(), queue);
        components.insert(components::SYNC_ENGINE.to_string(), engine);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once initialized and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let reason = if !ready {
            Some("Delivery subsystem not yet initialized")
        } else if health.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
