//! Connectivity, cache, statistics and health commands

use anyhow::Result;
use colored::Colorize;
use reqwest::StatusCode;
use tabled::Tabled;

use crate::client::{
    ApiClient, ConnectivityRequest, ConnectivityResponse, HealthResponse, ReadinessResponse,
    StatsResponse,
};
use crate::config::Config;
use crate::output::{
    color_rate, color_status, print_info, print_json, print_success, print_warning, OutputFormat,
};

/// Row for the health components table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Report a connectivity transition to the daemon
pub async fn set_connectivity(client: &ApiClient, online: bool, format: OutputFormat) -> Result<()> {
    let response: ConnectivityResponse = client
        .post("v1/connectivity", &ConnectivityRequest { online })
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            let state = if response.online { "online" } else { "offline" };
            if response.changed {
                print_success(&format!("Daemon is now {}", color_status(state)));
                if response.online {
                    print_info("Queued requests will drain in the background");
                }
            } else {
                print_info(&format!("Daemon was already {}", color_status(state)));
            }
        }
    }

    Ok(())
}

/// Invalidate one cache key, or the whole cache
pub async fn clear_cache(client: &ApiClient, key: Option<String>) -> Result<()> {
    match key {
        Some(key) => {
            client.delete_empty(&format!("v1/cache/{}", key)).await?;
            print_success(&format!("Invalidated cache entry '{}'", key));
        }
        None => {
            client.delete_empty("v1/cache").await?;
            print_success("Cache cleared");
        }
    }
    Ok(())
}

/// Show request, cache and sync counters
pub async fn show_stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats: StatsResponse = client.get("v1/stats").await?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Table => {
            println!("{}", "Requests".bold());
            println!("{}", "-".repeat(40));
            println!("Total:          {}", stats.client.total_requests);
            println!("Failures:       {}", stats.client.total_failures);
            println!("Success Rate:   {}", color_rate(stats.client.success_rate));
            println!();
            println!("{}", "Cache".bold());
            println!("{}", "-".repeat(40));
            println!("Entries:        {}", stats.cache.entries);
            println!("Hits:           {}", stats.cache.hits);
            println!("Misses:         {}", stats.cache.misses);
            println!();
            println!("{}", "Sync".bold());
            println!("{}", "-".repeat(40));
            println!("State:          {}", color_status(&stats.sync_state));
            println!("Drains:         {}", stats.sync.drains);
            println!("Delivered:      {}", stats.sync.delivered);
            println!("Failed:         {}", stats.sync.failed);
        }
    }

    Ok(())
}

/// Show liveness and readiness of the daemon
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (StatusCode, HealthResponse) = client.probe("healthz").await?;
    let (_, readiness): (StatusCode, ReadinessResponse) = client.probe("readyz").await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "health": health,
            "readiness": readiness,
        }))?,
        OutputFormat::Table => {
            println!("Daemon:  {}", client.base_url().as_str().cyan());
            println!("Status:  {}", color_status(&health.status));
            println!(
                "Ready:   {}",
                if readiness.ready { "yes".green() } else { "no".red() }
            );
            if let Some(reason) = &readiness.reason {
                print_warning(reason);
            }
            println!();

            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&c.status),
                    message: c.message.clone().unwrap_or_default(),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

/// Print the stored CLI configuration
pub fn show_config(config: &Config, resolved_api_url: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Table => {
            let path = Config::config_path()?;
            println!("Config file:  {}", path.display());
            println!(
                "Stored URL:   {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            println!("In use:       {}", resolved_api_url.cyan());
        }
    }
    Ok(())
}

/// Persist the default daemon endpoint
pub fn set_api_url(mut config: Config, url: String) -> Result<()> {
    url::Url::parse(&url).map_err(|e| anyhow::anyhow!("Invalid API URL '{}': {}", url, e))?;
    config.api_url = Some(url.clone());
    let path = config.save()?;
    print_success(&format!("Saved API URL {} to {}", url, path.display()));
    Ok(())
}
