//! Request client
//!
//! Public entry point for callers. Every `send` goes to exactly one of:
//! - the response cache, when a live entry exists for the cache key
//! - the transport, when online (with in-process retries)
//! - the persisted queue, when offline
//!
//! Queued requests are delivered later by the [`SyncEngine`]; their final
//! outcome is published through [`RequestClient::subscribe_reports`].

use crate::cache::{CacheConfig, CacheStats, ResponseCache};
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::error::{CourierError, CourierResult, ErrorKind, RetryOutcome, QUEUED_FOR_LATER_MESSAGE};
use crate::models::{ApiRequest, DeliveryStatus, NewRequest, Priority, SendOptions};
use crate::observability::{CourierMetrics, DeliveryLogger};
use crate::queue::{MemoryStorage, PersistedQueue, QueueConfig, Storage};
use crate::retry::BackoffPolicy;
use crate::sync::{
    DeliveryReport, Dispatcher, HttpTransport, SyncConfig, SyncEngine, SyncStats, SyncSummary,
    TokenProvider, Transport, TransportRequest, TransportResponse, DEFAULT_MAX_RETRIES,
    DEFAULT_REQUEST_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Configuration for the request client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL relative request URLs resolve against
    pub base_url: Option<String>,
    /// Immediate sends retry this many times after the first attempt;
    /// queued entries are dropped after this many failed attempts
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub sync_on_reconnect: bool,
    /// Merged under each request's own headers
    pub default_headers: BTreeMap<String, String>,
    /// Label attached to structured delivery events
    pub instance: String,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub backoff: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sync_on_reconnect: true,
            default_headers: BTreeMap::new(),
            instance: "courier".to_string(),
            queue: QueueConfig::default(),
            cache: CacheConfig::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// What a successful `send` produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    /// Response body, from the network or the cache
    Completed { body: Value },
    /// Parked in the offline queue; delivered on reconnect
    Queued { request_id: String },
}

impl SendOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued { .. })
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            SendOutcome::Completed { body } => Some(body),
            SendOutcome::Queued { .. } => None,
        }
    }

    /// User-facing message for a queued request
    pub fn message(&self) -> Option<&'static str> {
        self.is_queued().then_some(QUEUED_FOR_LATER_MESSAGE)
    }
}

/// Per-client request statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClientStats {
    pub total_requests: u64,
    pub total_failures: u64,
    /// Percentage of requests that did not fail; 100 when nothing was sent
    pub success_rate: f64,
}

enum ImmediateFailure {
    /// Connectivity dropped while waiting to retry
    WentOffline(RetryOutcome),
    Failed(RetryOutcome),
}

/// Resilient request client
pub struct RequestClient {
    config: ClientConfig,
    queue: Arc<PersistedQueue>,
    cache: Arc<ResponseCache>,
    connectivity: Arc<ConnectivityMonitor>,
    engine: Arc<SyncEngine>,
    dispatcher: Dispatcher,
    logger: DeliveryLogger,
    metrics: Option<CourierMetrics>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    subscriptions: Vec<Subscription>,
}

impl RequestClient {
    pub fn builder() -> RequestClientBuilder {
        RequestClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request, answering from the cache or queueing it when offline
    pub async fn send(
        &self,
        request: ApiRequest,
        options: SendOptions,
    ) -> CourierResult<SendOutcome> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.inc_requests();
        }

        if let Some(key) = &options.cache_key {
            if let Some(body) = self.cache.get(key) {
                return Ok(SendOutcome::Completed { body });
            }
        }

        let priority = options.priority.unwrap_or_else(|| default_priority(&request));

        if !self.connectivity.is_online() {
            return Ok(self.enqueue(request, priority, &options));
        }

        match self.send_online(&request, &options).await {
            Ok(response) => {
                if let Some(key) = &options.cache_key {
                    self.cache.put(key.clone(), response.body.clone());
                }
                Ok(SendOutcome::Completed {
                    body: response.body,
                })
            }
            Err(ImmediateFailure::WentOffline(_)) if !options.skip_queue_on_offline => {
                Ok(self.enqueue(request, priority, &options))
            }
            Err(ImmediateFailure::Failed(outcome))
                if outcome.kind == ErrorKind::Network && !options.skip_queue_on_offline =>
            {
                Ok(self.enqueue(request, priority, &options))
            }
            Err(ImmediateFailure::WentOffline(outcome)) | Err(ImmediateFailure::Failed(outcome)) => {
                self.record_failure(&request, &outcome);
                Err(CourierError::Request(outcome))
            }
        }
    }

    pub async fn get(&self, url: impl Into<String>, options: SendOptions) -> CourierResult<SendOutcome> {
        self.send(ApiRequest::get(url), options).await
    }

    pub async fn post(
        &self,
        url: impl Into<String>,
        payload: Value,
        options: SendOptions,
    ) -> CourierResult<SendOutcome> {
        self.send(ApiRequest::post(url, payload), options).await
    }

    async fn send_online(
        &self,
        request: &ApiRequest,
        options: &SendOptions,
    ) -> Result<TransportResponse, ImmediateFailure> {
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.request_timeout);
        let transport_request = TransportRequest::from_api(request, timeout);
        let max_retries = if options.skip_retry {
            0
        } else {
            self.config.max_retries
        };

        let mut online = self.connectivity.watch();
        let mut retries = 0;
        loop {
            match self.dispatcher.attempt(&transport_request).await {
                Ok(response) => return Ok(response),
                Err(outcome) if outcome.retryable && retries < max_retries => {
                    let delay = self.config.backoff.delay(retries);
                    retries += 1;
                    debug!(
                        url = %request.url,
                        kind = %outcome.kind,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying request"
                    );
                    if !wait_while_online(delay, &mut online).await {
                        return Err(ImmediateFailure::WentOffline(outcome));
                    }
                }
                Err(outcome) => return Err(ImmediateFailure::Failed(outcome)),
            }
        }
    }

    fn enqueue(&self, request: ApiRequest, priority: Priority, options: &SendOptions) -> SendOutcome {
        let method = request.method;
        let url = request.url.clone();
        let request_id = self.queue.enqueue(NewRequest {
            request,
            priority,
            cache_key: options.cache_key.clone(),
            timeout_ms: options.timeout_ms,
        });
        self.logger
            .log_queued(&request_id, method.as_str(), &url, priority);
        SendOutcome::Queued { request_id }
    }

    fn record_failure(&self, request: &ApiRequest, outcome: &RetryOutcome) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.inc_request_failures();
        }
        warn!(
            method = %request.method,
            url = %request.url,
            kind = %outcome.kind,
            http_status = ?outcome.http_status,
            "Request failed"
        );
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn logger(&self) -> &DeliveryLogger {
        &self.logger
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn on_online(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.connectivity.on_online(callback)
    }

    pub fn on_offline(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.connectivity.on_offline(callback)
    }

    pub fn get_queue_status(&self) -> DeliveryStatus {
        DeliveryStatus {
            online: self.connectivity.is_online(),
            syncing: self.engine.is_syncing(),
            queue: self.queue.status(),
        }
    }

    /// Consecutive failed queue snapshot saves
    pub fn queue_save_failures(&self) -> u32 {
        self.queue.save_failures()
    }

    pub fn clear_queue(&self) {
        self.queue.clear();
    }

    /// Clear one cache entry, or the whole cache when `key` is `None`
    pub fn invalidate_cache(&self, key: Option<&str>) {
        self.cache.invalidate(key);
    }

    /// Physically drop expired cache entries
    pub fn purge_expired_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drain the queue now; `None` if offline or a drain is already running
    pub async fn sync_now(&self) -> Option<SyncSummary> {
        self.engine.sync_now().await
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.engine.stats()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.engine.subscribe_reports()
    }

    pub fn stats(&self) -> ClientStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_failures = self.total_failures.load(Ordering::Relaxed);
        let success_rate = if total_requests == 0 {
            100.0
        } else {
            (total_requests.saturating_sub(total_failures)) as f64 / total_requests as f64 * 100.0
        };
        ClientStats {
            total_requests,
            total_failures,
            success_rate,
        }
    }

    pub fn reset_stats(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_failures.store(0, Ordering::Relaxed);
    }
}

impl Drop for RequestClient {
    fn drop(&mut self) {
        self.engine.stop();
        self.engine.detach();
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

/// Authentication requests jump the queue unless told otherwise
fn default_priority(request: &ApiRequest) -> Priority {
    if request.is_auth_request() {
        Priority::High
    } else {
        Priority::Normal
    }
}

/// Sleep for `delay`; false if connectivity is or goes offline first
async fn wait_while_online(delay: Duration, online: &mut watch::Receiver<bool>) -> bool {
    if !*online.borrow_and_update() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = online.changed() => {
                if changed.is_err() {
                    (&mut sleep).await;
                    return true;
                }
                if !*online.borrow_and_update() {
                    return false;
                }
            }
        }
    }
}

/// Builder for [`RequestClient`]
pub struct RequestClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<dyn Storage>>,
    connectivity: Option<Arc<ConnectivityMonitor>>,
    tokens: Option<Arc<dyn TokenProvider>>,
    metrics: Option<CourierMetrics>,
}

impl RequestClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            storage: None,
            connectivity: None,
            tokens: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn sync_on_reconnect(mut self, enabled: bool) -> Self {
        self.config.sync_on_reconnect = enabled;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.queue.max_queue_size = size;
        self
    }

    pub fn persist_queue(mut self, enabled: bool) -> Self {
        self.config.queue.persist_queue = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl = ttl;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.config.instance = instance.into();
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn metrics(mut self, metrics: CourierMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> CourierResult<RequestClient> {
        let config = self.config;
        if config.queue.max_queue_size == 0 {
            return Err(CourierError::Config(
                "max_queue_size must be at least 1".to_string(),
            ));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(config.base_url.as_deref())?),
        };
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| ConnectivityMonitor::new(true));
        let logger = DeliveryLogger::new(config.instance.clone());

        let mut queue = PersistedQueue::new(config.queue.clone(), storage);
        let mut cache = ResponseCache::new(config.cache.clone());
        let mut dispatcher =
            Dispatcher::new(transport).with_default_headers(config.default_headers.clone());
        if let Some(tokens) = self.tokens {
            dispatcher = dispatcher.with_token_provider(tokens);
        }
        if let Some(metrics) = &self.metrics {
            queue = queue.with_metrics(metrics.clone());
            cache = cache.with_metrics(metrics.clone());
            dispatcher = dispatcher.with_metrics(metrics.clone());
            metrics.set_online(connectivity.is_online());
        }
        let queue = Arc::new(queue);
        let cache = Arc::new(cache);

        let mut engine = SyncEngine::new(
            queue.clone(),
            connectivity.clone(),
            cache.clone(),
            dispatcher.clone(),
            SyncConfig {
                max_retries: config.max_retries,
                request_timeout: config.request_timeout,
                sync_on_reconnect: config.sync_on_reconnect,
                backoff: config.backoff.clone(),
            },
        )
        .with_logger(logger.clone());
        if let Some(metrics) = &self.metrics {
            engine = engine.with_metrics(metrics.clone());
        }
        let engine = Arc::new(engine);
        engine.start();

        let subscriptions = vec![
            connectivity_logger(&connectivity, &queue, &logger, self.metrics.clone(), true),
            connectivity_logger(&connectivity, &queue, &logger, self.metrics.clone(), false),
        ];

        Ok(RequestClient {
            config,
            queue,
            cache,
            connectivity,
            engine,
            dispatcher,
            logger,
            metrics: self.metrics,
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            subscriptions,
        })
    }
}

impl Default for RequestClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn connectivity_logger(
    connectivity: &ConnectivityMonitor,
    queue: &Arc<PersistedQueue>,
    logger: &DeliveryLogger,
    metrics: Option<CourierMetrics>,
    online: bool,
) -> Subscription {
    let queue = Arc::downgrade(queue);
    let logger = logger.clone();
    let callback = move || {
        let queued = queue.upgrade().map_or(0, |q| q.len());
        logger.log_connectivity(online, queued);
        if let Some(metrics) = &metrics {
            metrics.set_online(online);
        }
    };
    if online {
        connectivity.on_online(callback)
    } else {
        connectivity.on_offline(callback)
    }
}
