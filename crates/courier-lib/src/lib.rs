//! Resilient request delivery
//!
//! This crate provides the core functionality for:
//! - Classifying failed attempts and computing retry backoff
//! - Short-lived response caching
//! - Connectivity tracking from environment transitions
//! - A persisted, bounded priority queue for offline requests
//! - Draining that queue on reconnect
//! - Health checks and observability

pub mod cache;
pub mod client;
pub mod connectivity;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod queue;
pub mod retry;
pub mod sync;

pub use client::{ClientConfig, ClientStats, RequestClient, RequestClientBuilder, SendOutcome};
pub use error::{CourierError, CourierResult, ErrorKind, RetryOutcome};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CourierMetrics, DeliveryLogger};
