//! Core data models for the delivery subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Request priority. Lower rank drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank: high < normal < low
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as originated by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Opaque caller data carried through the queue untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_config: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            payload: None,
            headers: BTreeMap::new(),
            caller_config: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Post, url).with_payload(payload)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Requests against the authentication domain jump the queue
    pub fn is_auth_request(&self) -> bool {
        self.url.contains("/auth")
    }
}

/// Per-call options for [`crate::client::RequestClient::send`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendOptions {
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub cache_key: Option<String>,
    /// Surface the failure instead of queueing when connectivity is lost mid-send
    #[serde(default)]
    pub skip_queue_on_offline: bool,
    /// Make a single attempt only
    #[serde(default)]
    pub skip_retry: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SendOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// Everything the queue needs to create a [`QueuedRequest`]
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub request: ApiRequest,
    pub priority: Priority,
    pub cache_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl NewRequest {
    pub fn new(request: ApiRequest, priority: Priority) -> Self {
        Self {
            request,
            priority,
            cache_key: None,
            timeout_ms: None,
        }
    }
}

/// A request waiting in the persisted queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: String,
    pub method: Method,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl QueuedRequest {
    pub(crate) fn from_new(id: String, enqueued_at: DateTime<Utc>, new: NewRequest) -> Self {
        let NewRequest {
            request,
            priority,
            cache_key,
            timeout_ms,
        } = new;
        Self {
            id,
            method: request.method,
            url: request.url,
            payload: request.payload,
            headers: request.headers,
            enqueued_at,
            retry_count: 0,
            priority,
            caller_config: request.caller_config,
            cache_key,
            timeout_ms,
        }
    }

    /// Ordering key: (priority rank, enqueued_at)
    pub fn sort_key(&self) -> (u8, DateTime<Utc>) {
        (self.priority.rank(), self.enqueued_at)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Snapshot of the queue contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub length: usize,
    pub capacity: usize,
    pub entries: Vec<QueuedRequest>,
}

/// Queue snapshot enriched with connectivity and drain state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub online: bool,
    pub syncing: bool,
    #[serde(flatten)]
    pub queue: QueueStatus,
}
