//! Persisted priority queue
//!
//! Bounded store of pending requests ordered by (priority rank, enqueued_at):
//! - Capacity eviction prefers low, then normal, then the oldest entry overall
//! - Every structural mutation is followed by a full snapshot save
//! - Rehydrates from storage on construction; corrupt snapshots are discarded

use super::storage::Storage;
use crate::error::CourierResult;
use crate::models::{NewRequest, Priority, QueueStatus, QueuedRequest};
use crate::observability::CourierMetrics;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Fixed namespace key the queue snapshot is stored under
pub const DEFAULT_NAMESPACE_KEY: &str = "courier_offline_queue";

/// Default maximum number of queued requests
const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Configuration for the request queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of entries held at once
    pub max_queue_size: usize,
    /// Save a snapshot after every mutation
    pub persist_queue: bool,
    /// Storage key for the snapshot
    pub namespace_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            persist_queue: true,
            namespace_key: DEFAULT_NAMESPACE_KEY.to_string(),
        }
    }
}

/// Durable, bounded, priority-ordered request queue
pub struct PersistedQueue {
    entries: Mutex<Vec<QueuedRequest>>,
    config: QueueConfig,
    storage: Arc<dyn Storage>,
    metrics: Option<CourierMetrics>,
    /// Snapshot saves that failed since the last successful one
    save_failures: AtomicU32,
}

impl PersistedQueue {
    /// Create a queue, rehydrating from storage when persistence is enabled
    pub fn new(config: QueueConfig, storage: Arc<dyn Storage>) -> Self {
        let queue = Self {
            entries: Mutex::new(Vec::new()),
            config,
            storage,
            metrics: None,
            save_failures: AtomicU32::new(0),
        };

        if queue.config.persist_queue {
            let restored = queue.rehydrate();
            *queue.lock() = restored;
        }

        queue
    }

    /// Report queue length to Prometheus as well
    pub fn with_metrics(mut self, metrics: CourierMetrics) -> Self {
        metrics.set_queue_length(self.len());
        self.metrics = Some(metrics);
        self
    }

    pub fn capacity(&self) -> usize {
        self.config.max_queue_size
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Add a request; evicts one entry first when at capacity. Never rejects.
    pub fn enqueue(&self, new: NewRequest) -> String {
        let mut entries = self.lock();

        let capacity = self.config.max_queue_size.max(1);
        while entries.len() >= capacity {
            if let Some(evicted) = evict_one(&mut entries) {
                warn!(
                    request_id = %evicted.id,
                    priority = %evicted.priority,
                    url = %evicted.url,
                    "Queue full, evicted request"
                );
            }
        }

        let id = generate_id(&entries);
        let enqueued_at = not_before_band(&entries, new.priority, Utc::now());
        let request = QueuedRequest::from_new(id.clone(), enqueued_at, new);

        debug!(
            request_id = %id,
            priority = %request.priority,
            url = %request.url,
            "Enqueued request"
        );

        entries.push(request);
        entries.sort_by_key(QueuedRequest::sort_key);

        self.persist(&entries);
        id
    }

    /// The next request to deliver
    pub fn peek_head(&self) -> Option<QueuedRequest> {
        self.lock().first().cloned()
    }

    pub fn remove_head(&self) -> Option<QueuedRequest> {
        let mut entries = self.lock();
        if entries.is_empty() {
            return None;
        }
        let head = entries.remove(0);
        self.persist(&entries);
        Some(head)
    }

    /// Move the head to the tail of its priority band, counting one more retry
    pub fn requeue_head(&self) -> Option<QueuedRequest> {
        let mut entries = self.lock();
        if entries.is_empty() {
            return None;
        }
        let requeued = requeue_at(&mut entries, 0);
        self.persist(&entries);
        Some(requeued)
    }

    /// Remove a specific request. `None` if it is no longer queued.
    pub fn remove(&self, id: &str) -> Option<QueuedRequest> {
        let mut entries = self.lock();
        let idx = entries.iter().position(|r| r.id == id)?;
        let removed = entries.remove(idx);
        self.persist(&entries);
        Some(removed)
    }

    /// Requeue a specific request. `None` if it is no longer queued.
    pub fn requeue(&self, id: &str) -> Option<QueuedRequest> {
        let mut entries = self.lock();
        let idx = entries.iter().position(|r| r.id == id)?;
        let requeued = requeue_at(&mut entries, idx);
        self.persist(&entries);
        Some(requeued)
    }

    pub fn status(&self) -> QueueStatus {
        let entries = self.lock();
        QueueStatus {
            length: entries.len(),
            capacity: self.config.max_queue_size,
            entries: entries.clone(),
        }
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        self.persist(&entries);
        info!(dropped, "Cleared request queue");
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedRequest>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Save a full snapshot. Called with the entries lock held so snapshots
    /// land in mutation order.
    fn persist(&self, entries: &[QueuedRequest]) {
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_length(entries.len());
        }

        if !self.config.persist_queue {
            return;
        }

        match self.save_snapshot(entries) {
            Ok(()) => self.save_failures.store(0, Ordering::Relaxed),
            Err(e) => {
                let failures = self.save_failures.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                warn!(
                    error = %e,
                    key = %self.config.namespace_key,
                    consecutive_failures = failures,
                    "Failed to persist request queue"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_storage_errors();
                }
            }
        }
    }

    fn save_snapshot(&self, entries: &[QueuedRequest]) -> CourierResult<()> {
        let json = serde_json::to_vec(entries)?;
        self.storage.save(&self.config.namespace_key, &json)?;
        Ok(())
    }

    /// Consecutive snapshot saves that failed; zero after any success
    pub fn save_failures(&self) -> u32 {
        self.save_failures.load(Ordering::Relaxed)
    }

    fn rehydrate(&self) -> Vec<QueuedRequest> {
        let key = &self.config.namespace_key;

        let bytes = match self.storage.load(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, key = %key, "Failed to load persisted queue, starting empty");
                return Vec::new();
            }
        };

        let mut entries: Vec<QueuedRequest> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, key = %key, "Discarding unreadable persisted queue");
                if let Err(e) = self.storage.delete(key) {
                    warn!(error = %e, key = %key, "Failed to delete unreadable queue");
                }
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        entries.retain(|r| seen.insert(r.id.clone()));
        entries.sort_by_key(QueuedRequest::sort_key);

        let capacity = self.config.max_queue_size.max(1);
        while entries.len() > capacity {
            evict_one(&mut entries);
        }

        info!(key = %key, entries = entries.len(), "Rehydrated request queue");
        entries
    }
}

/// Evict the oldest low entry, else the oldest normal, else the oldest overall.
/// Entries must be sorted.
fn evict_one(entries: &mut Vec<QueuedRequest>) -> Option<QueuedRequest> {
    if entries.is_empty() {
        return None;
    }

    let idx = [Priority::Low, Priority::Normal]
        .iter()
        .find_map(|p| entries.iter().position(|r| r.priority == *p))
        .unwrap_or_else(|| oldest_index(entries));

    Some(entries.remove(idx))
}

fn oldest_index(entries: &[QueuedRequest]) -> usize {
    entries
        .iter()
        .enumerate()
        .min_by_key(|(_, r)| r.enqueued_at)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Timestamp for a new tail entry of `priority`'s band.
///
/// Never earlier than the band's current newest entry, so FIFO order within
/// a band survives clock adjustments.
fn not_before_band(
    entries: &[QueuedRequest],
    priority: Priority,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    entries
        .iter()
        .filter(|r| r.priority == priority)
        .map(|r| r.enqueued_at)
        .max()
        .map_or(now, |latest| latest.max(now))
}

fn requeue_at(entries: &mut Vec<QueuedRequest>, idx: usize) -> QueuedRequest {
    let mut request = entries.remove(idx);
    request.retry_count = request.retry_count.saturating_add(1);
    request.enqueued_at = not_before_band(entries, request.priority, Utc::now());

    let rank = request.priority.rank();
    let insert_at = entries
        .iter()
        .position(|r| r.priority.rank() > rank)
        .unwrap_or(entries.len());
    entries.insert(insert_at, request.clone());

    debug!(
        request_id = %request.id,
        retry_count = request.retry_count,
        "Requeued request at tail of its band"
    );
    request
}

fn generate_id(entries: &[QueuedRequest]) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let suffix: String = (0..ID_SUFFIX_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        let id = format!("req_{}_{}", Utc::now().timestamp_millis(), suffix);
        if !entries.iter().any(|r| r.id == id) {
            return id;
        }
    }
}
