//! Offline queue inspection and draining

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ClearResponse, QueueStatus, SyncResponse};
use crate::output::{
    color_priority, color_status, format_age, print_info, print_json, print_success,
    print_warning, truncate_id, OutputFormat,
};

/// Row for the queue table
#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Retries")]
    retries: u32,
    #[tabled(rename = "Age")]
    age: String,
}

/// Show queue contents in drain order
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: QueueStatus = client.get("v1/queue").await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            let connectivity = if status.online { "online" } else { "offline" };
            println!("{}", "Delivery Queue".bold());
            println!("{}", "=".repeat(60));
            println!("Connectivity: {}", color_status(connectivity));
            println!(
                "Syncing:      {}",
                if status.syncing { "yes".yellow() } else { "no".normal() }
            );
            println!("Length:       {}/{}", status.length, status.capacity);
            println!();

            if status.entries.is_empty() {
                print_warning("Queue is empty");
                return Ok(());
            }

            let now = Utc::now();
            let rows: Vec<QueueRow> = status
                .entries
                .iter()
                .map(|e| QueueRow {
                    id: truncate_id(&e.id),
                    method: e.method.clone(),
                    url: e.url.clone(),
                    priority: color_priority(&e.priority),
                    retries: e.retry_count,
                    age: format_age(e.enqueued_at, now),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} queued requests", status.entries.len());
        }
    }

    Ok(())
}

/// Drop every queued request
pub async fn clear(client: &ApiClient, yes: bool, format: OutputFormat) -> Result<()> {
    if !yes {
        print_warning("This discards every queued request without delivering it.");
        print_info("Re-run with --yes to confirm.");
        return Ok(());
    }

    let response: ClearResponse = client.delete("v1/queue").await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            print_success(&format!("Cleared {} queued requests", response.cleared));
        }
    }

    Ok(())
}

/// Trigger a drain and wait for its summary
pub async fn sync(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: SyncResponse = client.post("v1/sync", &serde_json::json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            if !response.started {
                print_warning("Sync did not run: the daemon is offline or already draining");
                return Ok(());
            }
            print_success(&format!(
                "Sync finished: {} delivered, {} failed",
                response.success.to_string().green(),
                if response.failure > 0 {
                    response.failure.to_string().red()
                } else {
                    response.failure.to_string().normal()
                }
            ));
        }
    }

    Ok(())
}
