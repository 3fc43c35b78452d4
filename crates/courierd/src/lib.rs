//! courierd: resilient request delivery as a local HTTP service

pub mod api;
pub mod config;
