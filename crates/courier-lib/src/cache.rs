//! Short-lived response cache
//!
//! Memoizes completed reads under a caller-supplied key. Entries are never
//! keyed by URL. An entry older than the ttl reads as absent whether or not
//! it has been physically evicted.

use crate::observability::CourierMetrics;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default time-to-live (5 minutes)
const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    cached_at: Instant,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries physically held, live or expired
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Time-boxed memoization of completed reads
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    metrics: Option<CourierMetrics>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Report hits and misses to Prometheus as well
    pub fn with_metrics(mut self, metrics: CourierMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry
    pub fn get(&self, key: &str) -> Option<Value> {
        let live = self
            .entries
            .get(key)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone());

        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_cache_hit();
                }
                debug!(key = %key, "Response cache hit");
                Some(value)
            }
            None => {
                // Drop the stale entry, but only if nobody refreshed it meanwhile
                self.entries
                    .remove_if(key, |_, entry| entry.cached_at.elapsed() >= self.ttl);
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_cache_miss();
                }
                None
            }
        }
    }

    pub fn put(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        debug!(key = %key, "Caching response");
        self.entries.insert(
            key,
            CacheEntry {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    /// Clear one entry, or every entry when `key` is `None`
    pub fn invalidate(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.entries.remove(key);
                debug!(key = %key, "Invalidated cache entry");
            }
            None => {
                self.entries.clear();
                debug!("Invalidated entire response cache");
            }
        }
    }

    /// Physically drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
