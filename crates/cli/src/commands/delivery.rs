//! Request submission

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::client::{ApiClient, ApiError, SendRequest, SendResponse};
use crate::output::{color_status, print_error, print_info, print_success, OutputFormat};

/// Flags of `courierctl send`, already parsed by clap
pub struct SendArgs {
    pub method: String,
    pub url: String,
    pub data: Option<String>,
    pub headers: Vec<String>,
    pub priority: Option<String>,
    pub cache_key: Option<String>,
    pub no_queue: bool,
    pub no_retry: bool,
    pub timeout_ms: Option<u64>,
}

impl SendArgs {
    pub fn into_request(self) -> Result<SendRequest> {
        let payload = match self.data {
            Some(raw) => Some(
                serde_json::from_str::<Value>(&raw).context("--data must be valid JSON")?,
            ),
            None => None,
        };

        Ok(SendRequest {
            method: self.method.to_uppercase(),
            url: self.url,
            payload,
            headers: parse_headers(&self.headers)?,
            priority: self.priority,
            cache_key: self.cache_key,
            skip_queue_on_offline: self.no_queue,
            skip_retry: self.no_retry,
            timeout_ms: self.timeout_ms,
        })
    }
}

/// Parse repeated `Name: value` flags
fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            bail!("header '{}' must look like 'Name: value'", entry);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("header '{}' has an empty name", entry);
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

/// Submit a request through the daemon
pub async fn send(client: &ApiClient, args: SendArgs, format: OutputFormat) -> Result<()> {
    let request = args.into_request()?;

    let response: SendResponse = match client.post("v1/requests", &request).await {
        Ok(response) => response,
        Err(err) => {
            if let Some(ApiError::Delivery {
                kind,
                message,
                upstream_status,
                retryable,
            }) = err.downcast_ref::<ApiError>()
            {
                print_error(message);
                let status = upstream_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                eprintln!(
                    "  kind: {}  upstream status: {}  retryable: {}",
                    kind.red(),
                    status,
                    retryable
                );
            }
            return Err(err);
        }
    };

    match format {
        OutputFormat::Json => crate::output::print_json(&response)?,
        OutputFormat::Table => match response.status.as_str() {
            "queued" => {
                print_info(response.message.as_deref().unwrap_or("Request queued"));
                if let Some(id) = &response.request_id {
                    println!("Request ID: {}", id.cyan());
                }
            }
            _ => {
                print_success(&format!(
                    "{} {} {}",
                    request.method,
                    request.url,
                    color_status(&response.status)
                ));
                if let Some(body) = response.body.filter(|b| !b.is_null()) {
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
            }
        },
    }

    Ok(())
}
