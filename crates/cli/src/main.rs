//! courierctl
//!
//! A command-line tool for submitting requests through courierd,
//! inspecting the offline queue and steering connectivity and sync.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{delivery, queue, system};

/// Courier delivery daemon CLI
#[derive(Parser)]
#[command(name = "courierctl")]
#[command(author, version, about = "CLI for the Courier delivery daemon", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via COURIER_API_URL env var)
    #[arg(long, env = "COURIER_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a request through the daemon, queueing it while offline
    Send {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Request URL, absolute or relative to the daemon's upstream base
        url: String,

        /// JSON payload
        #[arg(long, short)]
        data: Option<String>,

        /// Extra header as 'Name: value' (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,

        /// Queue priority (high, normal, low)
        #[arg(long)]
        priority: Option<String>,

        /// Cache key for the successful response
        #[arg(long)]
        cache_key: Option<String>,

        /// Fail instead of queueing when offline
        #[arg(long)]
        no_queue: bool,

        /// Make a single attempt
        #[arg(long)]
        no_retry: bool,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Inspect or clear the offline queue
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Drain the offline queue now
    Sync,

    /// Report connectivity transitions to the daemon
    #[command(subcommand)]
    Connectivity(ConnectivityCommands),

    /// Manage the response cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Show request, cache and sync counters
    Stats,

    /// Show daemon health and readiness
    Health,

    /// Manage CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show queued requests in drain order
    Status,

    /// Discard every queued request
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConnectivityCommands {
    /// Mark the daemon online
    Online,
    /// Mark the daemon offline
    Offline,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Invalidate one entry, or everything when no key is given
    Clear {
        /// Cache key to invalidate
        key: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the stored configuration
    Show,

    /// Store the default API endpoint
    SetApiUrl {
        /// Daemon base URL
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let stored = config::Config::load()?;
    let api_url = stored.resolve_api_url(cli.api_url);

    // Settings commands work without a reachable daemon
    if let Commands::Config(config_cmd) = cli.command {
        return match config_cmd {
            ConfigCommands::Show => system::show_config(&stored, &api_url, cli.format),
            ConfigCommands::SetApiUrl { url } => system::set_api_url(stored, url),
        };
    }

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Send {
            method,
            url,
            data,
            headers,
            priority,
            cache_key,
            no_queue,
            no_retry,
            timeout_ms,
        } => {
            let args = delivery::SendArgs {
                method,
                url,
                data,
                headers,
                priority,
                cache_key,
                no_queue,
                no_retry,
                timeout_ms,
            };
            delivery::send(&client, args, cli.format).await?;
        }
        Commands::Queue(queue_cmd) => match queue_cmd {
            QueueCommands::Status => queue::show_status(&client, cli.format).await?,
            QueueCommands::Clear { yes } => queue::clear(&client, yes, cli.format).await?,
        },
        Commands::Sync => queue::sync(&client, cli.format).await?,
        Commands::Connectivity(conn_cmd) => {
            let online = matches!(conn_cmd, ConnectivityCommands::Online);
            system::set_connectivity(&client, online, cli.format).await?;
        }
        Commands::Cache(CacheCommands::Clear { key }) => system::clear_cache(&client, key).await?,
        Commands::Stats => system::show_stats(&client, cli.format).await?,
        Commands::Health => system::show_health(&client, cli.format).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
