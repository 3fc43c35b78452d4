//! Delivery of queued requests
//!
//! This module provides:
//! - The transport boundary and its reqwest implementation
//! - The sync engine that drains the offline queue on reconnect

mod engine;
mod transport;

#[cfg(test)]
pub(crate) mod mock;


pub use engine::{
    DeliveryReport, DeliveryResult, SyncConfig, SyncEngine, SyncState, SyncStats, SyncSummary,
    DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT,
};
pub use transport::{
    Dispatcher, HttpTransport, StaticToken, TokenProvider, Transport, TransportError,
    TransportRequest, TransportResponse,
};
