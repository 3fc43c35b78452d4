//! Sync engine
//!
//! Drains the persisted queue through the transport whenever connectivity
//! comes back (or on demand). One drain runs at a time; concurrent triggers
//! are no-ops. Each step takes the head, executes it and then:
//! - success: remove it and report the response
//! - retryable failure with attempts left: requeue it at the tail of its band
//! - anything else: remove it and report the classified failure

use super::transport::{Dispatcher, TransportRequest};
use crate::cache::ResponseCache;
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::error::RetryOutcome;
use crate::models::QueuedRequest;
use crate::observability::{CourierMetrics, DeliveryLogger};
use crate::queue::PersistedQueue;
use crate::retry::BackoffPolicy;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, info, warn};

/// Default number of executions before a retryable entry is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// An entry is dropped once this many attempts have failed
    pub max_retries: u32,
    /// Deadline for entries without their own timeout
    pub request_timeout: Duration,
    /// Start a drain automatically when connectivity comes back
    pub sync_on_reconnect: bool,
    pub backoff: BackoffPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sync_on_reconnect: true,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Draining,
    StoppedOffline,
}

/// Result of one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub success: usize,
    pub failure: usize,
}

/// Lifetime totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub drains: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Final outcome of a queued request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    Delivered { http_status: u16, body: Value },
    Failed { error: RetryOutcome },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub request_id: String,
    pub url: String,
    #[serde(flatten)]
    pub result: DeliveryResult,
}

enum WaitOutcome {
    Elapsed,
    WentOffline,
    Stopped,
}

/// Clears the drain flag however the drain ends, including cancellation
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Queue drain loop
pub struct SyncEngine {
    queue: Arc<PersistedQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    cache: Arc<ResponseCache>,
    dispatcher: Dispatcher,
    config: SyncConfig,
    draining: AtomicBool,
    stop_requested: AtomicBool,
    stop_signal: Notify,
    state: Mutex<SyncState>,
    reports: broadcast::Sender<DeliveryReport>,
    subscription: Mutex<Option<Subscription>>,
    logger: DeliveryLogger,
    metrics: Option<CourierMetrics>,
    drains: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<PersistedQueue>,
        connectivity: Arc<ConnectivityMonitor>,
        cache: Arc<ResponseCache>,
        dispatcher: Dispatcher,
        config: SyncConfig,
    ) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            queue,
            connectivity,
            cache,
            dispatcher,
            config,
            draining: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_signal: Notify::new(),
            state: Mutex::new(SyncState::Idle),
            reports,
            subscription: Mutex::new(None),
            logger: DeliveryLogger::new("sync-engine"),
            metrics: None,
            drains: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn with_logger(mut self, logger: DeliveryLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_metrics(mut self, metrics: CourierMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Subscribe to connectivity so a drain starts on every online edge.
    ///
    /// The drain is spawned on the current tokio runtime; outside a runtime
    /// the trigger is skipped with a warning. Calling this twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if subscription.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        *subscription = Some(self.connectivity.on_online(move || {
            let Some(engine) = weak.upgrade() else {
                return;
            };
            if !engine.config.sync_on_reconnect || engine.queue.is_empty() {
                return;
            }
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        engine.sync_now().await;
                    });
                }
                Err(_) => warn!("No async runtime available, skipping reconnect drain"),
            }
        }));

        debug!("Sync engine subscribed to connectivity");
    }

    /// Stop reacting to connectivity changes
    pub fn detach(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    /// Run one drain cycle now.
    ///
    /// Returns `None` when skipped: already draining, or offline.
    pub async fn sync_now(&self) -> Option<SyncSummary> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping drain");
            return None;
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in progress");
            return None;
        }
        let _guard = DrainGuard {
            flag: &self.draining,
        };

        self.stop_requested.store(false, Ordering::Release);
        self.set_state(SyncState::Draining);

        let (summary, final_state) = self.drain().await;

        self.set_state(final_state);
        self.drains.fetch_add(1, Ordering::Relaxed);
        self.logger
            .log_drain_finished(summary.success, summary.failure, self.queue.len());

        Some(summary)
    }

    /// Ask the running drain to finish after its current request
    pub fn stop(&self) {
        if self.is_syncing() {
            info!("Stopping queue drain");
        }
        self.stop_requested.store(true, Ordering::Release);
        self.stop_signal.notify_waiters();
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_syncing(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            drains: self.drains.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Receive the final outcome of every queued request
    pub fn subscribe_reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    async fn drain(&self) -> (SyncSummary, SyncState) {
        let mut summary = SyncSummary::default();
        let mut online = self.connectivity.watch();
        let mut waited_for: Option<String> = None;

        loop {
            if self.stop_requested.load(Ordering::Acquire) {
                return (summary, SyncState::Idle);
            }
            if !self.connectivity.is_online() {
                info!(remaining = self.queue.len(), "Connectivity lost, pausing drain");
                return (summary, SyncState::StoppedOffline);
            }
            let Some(head) = self.queue.peek_head() else {
                return (summary, SyncState::Idle);
            };

            if head.retry_count > 0 && waited_for.as_deref() != Some(head.id.as_str()) {
                let delay = self.config.backoff.delay(head.retry_count - 1);
                debug!(
                    request_id = %head.id,
                    retry_count = head.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                match self.wait(delay, &mut online).await {
                    WaitOutcome::Elapsed => {
                        // The head may have changed while waiting
                        waited_for = Some(head.id);
                        continue;
                    }
                    WaitOutcome::WentOffline => {
                        info!(remaining = self.queue.len(), "Connectivity lost, pausing drain");
                        return (summary, SyncState::StoppedOffline);
                    }
                    WaitOutcome::Stopped => return (summary, SyncState::Idle),
                }
            }
            waited_for = None;

            let request = TransportRequest::from_queued(&head, self.config.request_timeout);
            let attempts = head.retry_count.saturating_add(1);
            match self.dispatcher.attempt(&request).await {
                Ok(response) => {
                    self.queue.remove(&head.id);
                    summary.success += 1;
                    self.on_delivered(&head, response.status, response.body);
                }
                Err(outcome) if outcome.retryable && attempts < self.config.max_retries => {
                    debug!(
                        request_id = %head.id,
                        kind = %outcome.kind,
                        attempt = attempts,
                        "Retryable failure, requeueing"
                    );
                    self.queue.requeue(&head.id);
                }
                Err(outcome) => {
                    self.queue.remove(&head.id);
                    summary.failure += 1;
                    self.on_failed(&head, outcome);
                }
            }
        }
    }

    async fn wait(&self, delay: Duration, online: &mut watch::Receiver<bool>) -> WaitOutcome {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return WaitOutcome::Elapsed,
                _ = self.stop_signal.notified() => return WaitOutcome::Stopped,
                changed = online.changed() => {
                    if changed.is_err() {
                        (&mut sleep).await;
                        return WaitOutcome::Elapsed;
                    }
                    if !*online.borrow_and_update() {
                        return WaitOutcome::WentOffline;
                    }
                }
            }
        }
    }

    fn on_delivered(&self, request: &QueuedRequest, status: u16, body: Value) {
        if let Some(key) = &request.cache_key {
            self.cache.put(key.clone(), body.clone());
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.inc_drain_success();
        }
        self.logger.log_delivered(request, status);

        let _ = self.reports.send(DeliveryReport {
            request_id: request.id.clone(),
            url: request.url.clone(),
            result: DeliveryResult::Delivered {
                http_status: status,
                body,
            },
        });
    }

    fn on_failed(&self, request: &QueuedRequest, outcome: RetryOutcome) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.inc_drain_failure();
        }
        self.logger.log_failed(request, &outcome);

        let _ = self.reports.send(DeliveryReport {
            request_id: request.id.clone(),
            url: request.url.clone(),
            result: DeliveryResult::Failed { error: outcome },
        });
    }
}
