//! Observability infrastructure for request delivery
//!
//! Provides:
//! - Prometheus metrics (queue length, delivery counters, cache hit rate, latency)
//! - Structured event logging with tracing

use crate::error::RetryOutcome;
use crate::models::{Priority, QueuedRequest};
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for request latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CourierMetricsInner> = OnceLock::new();

struct CourierMetricsInner {
    queue_length: IntGauge,
    online: IntGauge,
    requests_total: IntCounter,
    request_failures_total: IntCounter,
    drain_success_total: IntCounter,
    drain_failure_total: IntCounter,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
    storage_errors_total: IntCounter,
    request_latency_seconds: Histogram,
}

impl CourierMetricsInner {
    fn new() -> Self {
        Self {
            queue_length: register_int_gauge!(
                "courier_queue_length",
                "Number of requests waiting in the offline queue"
            )
            .expect("Failed to register queue_length"),

            online: register_int_gauge!(
                "courier_online",
                "1 when connectivity is online, 0 when offline"
            )
            .expect("Failed to register online"),

            requests_total: register_counter(
                "courier_requests_total",
                "Total number of requests sent by callers",
            ),

            request_failures_total: register_counter(
                "courier_request_failures_total",
                "Total number of caller requests that ended in a terminal failure",
            ),

            drain_success_total: register_counter(
                "courier_drain_success_total",
                "Total number of queued requests delivered by the sync engine",
            ),

            drain_failure_total: register_counter(
                "courier_drain_failure_total",
                "Total number of queued requests dropped after a terminal failure",
            ),

            cache_hits_total: register_counter(
                "courier_cache_hits_total",
                "Total number of response cache hits",
            ),

            cache_misses_total: register_counter(
                "courier_cache_misses_total",
                "Total number of response cache misses",
            ),

            storage_errors_total: register_counter(
                "courier_storage_errors_total",
                "Total number of failed queue persistence operations",
            ),

            request_latency_seconds: register_histogram!(
                "courier_request_latency_seconds",
                "Time spent on a single transport attempt",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register request_latency_seconds"),
        }
    }
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    register_int_counter!(name, help)
        .unwrap_or_else(|e| panic!("Failed to register {}: {}", name, e))
}

/// Delivery metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct CourierMetrics {
    _private: (),
}

impl Default for CourierMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CourierMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CourierMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CourierMetricsInner {
        GLOBAL_METRICS.get_or_init(CourierMetricsInner::new)
    }

    pub fn set_queue_length(&self, length: usize) {
        self.inner().queue_length.set(length as i64);
    }

    pub fn set_online(&self, online: bool) {
        self.inner().online.set(i64::from(online));
    }

    pub fn inc_requests(&self) {
        self.inner().requests_total.inc();
    }

    pub fn inc_request_failures(&self) {
        self.inner().request_failures_total.inc();
    }

    pub fn inc_drain_success(&self) {
        self.inner().drain_success_total.inc();
    }

    pub fn inc_drain_failure(&self) {
        self.inner().drain_failure_total.inc();
    }

    pub fn inc_cache_hit(&self) {
        self.inner().cache_hits_total.inc();
    }

    pub fn inc_cache_miss(&self) {
        self.inner().cache_misses_total.inc();
    }

    pub fn inc_storage_errors(&self) {
        self.inner().storage_errors_total.inc();
    }

    /// Record one transport attempt latency
    pub fn observe_request_latency(&self, duration_secs: f64) {
        self.inner().request_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for delivery events
///
/// Provides consistent event-style records for queueing, delivery,
/// and connectivity transitions.
#[derive(Clone)]
pub struct DeliveryLogger {
    instance: String,
}

impl DeliveryLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, queued: usize, online: bool) {
        info!(
            event = "startup",
            instance = %self.instance,
            version = %version,
            queued = queued,
            online = online,
            "Delivery service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str, queued: usize) {
        info!(
            event = "shutdown",
            instance = %self.instance,
            reason = %reason,
            queued = queued,
            "Delivery service shutting down"
        );
    }

    /// Log a request parked in the offline queue
    pub fn log_queued(&self, request_id: &str, method: &str, url: &str, priority: Priority) {
        info!(
            event = "request_queued",
            instance = %self.instance,
            request_id = %request_id,
            method = %method,
            url = %url,
            priority = %priority,
            "Request queued for later delivery"
        );
    }

    /// Log a queued request delivered by the sync engine
    pub fn log_delivered(&self, request: &QueuedRequest, status: u16) {
        info!(
            event = "request_delivered",
            instance = %self.instance,
            request_id = %request.id,
            method = %request.method,
            url = %request.url,
            status = status,
            retry_count = request.retry_count,
            "Queued request delivered"
        );
    }

    /// Log a queued request dropped after a terminal failure
    pub fn log_failed(&self, request: &QueuedRequest, outcome: &RetryOutcome) {
        warn!(
            event = "request_failed",
            instance = %self.instance,
            request_id = %request.id,
            method = %request.method,
            url = %request.url,
            kind = %outcome.kind,
            http_status = ?outcome.http_status,
            retry_count = request.retry_count,
            "Queued request dropped after terminal failure"
        );
    }

    /// Log the end of a drain cycle
    pub fn log_drain_finished(&self, success: usize, failure: usize, remaining: usize) {
        info!(
            event = "drain_finished",
            instance = %self.instance,
            success = success,
            failure = failure,
            remaining = remaining,
            "Queue drain finished"
        );
    }

    /// Log a connectivity transition
    pub fn log_connectivity(&self, online: bool, queued: usize) {
        if online {
            info!(
                event = "connectivity_changed",
                instance = %self.instance,
                online = true,
                queued = queued,
                "Connectivity restored"
            );
        } else {
            warn!(
                event = "connectivity_changed",
                instance = %self.instance,
                online = false,
                queued = queued,
                "Connectivity lost, queueing requests locally"
            );
        }
    }
}
