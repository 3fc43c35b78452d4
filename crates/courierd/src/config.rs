//! Daemon configuration

use anyhow::{Context, Result};
use courier_lib::queue::QueueConfig;
use courier_lib::ClientConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
///
/// Read from `COURIER_*` environment variables, layered over an optional
/// `courierd.toml` in the working directory.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Port for the HTTP API
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Upstream API that relative request URLs resolve against
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Directory holding the persisted queue; in-memory when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Connectivity state before the first reported transition
    #[serde(default = "default_true")]
    pub start_online: bool,

    #[serde(default = "default_true")]
    pub sync_on_reconnect: bool,

    /// Sent as `Authorization: Bearer <token>` on every attempt
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Label attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,
}

fn default_listen_port() -> u16 {
    8080
}

fn default_max_queue_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "courierd".to_string())
}

impl DaemonConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("courierd").required(false))
            .add_source(config::Environment::with_prefix("COURIER").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        let parsed: Self = config
            .try_deserialize()
            .context("Invalid daemon configuration")?;

        if parsed.max_queue_size == 0 {
            anyhow::bail!("max_queue_size must be at least 1");
        }
        Ok(parsed)
    }

    /// Library client configuration derived from these settings
    pub fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig {
            base_url: self.api_base_url.clone(),
            max_retries: self.max_retries,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            sync_on_reconnect: self.sync_on_reconnect,
            instance: self.instance.clone(),
            queue: QueueConfig {
                max_queue_size: self.max_queue_size,
                persist_queue: self.data_dir.is_some(),
                ..Default::default()
            },
            ..Default::default()
        };
        client.cache.ttl = Duration::from_secs(self.cache_ttl_secs);
        client
    }
}
