//! Retry decisions for delivery attempts
//!
//! This module provides:
//! - Classification of raw transport/HTTP outcomes into error kinds
//! - Exponential backoff with jitter between retries

mod backoff;
mod classifier;

pub use backoff::BackoffPolicy;
pub use classifier::{classify, RawOutcome};
