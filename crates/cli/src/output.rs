//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Age of a timestamp relative to `now`, e.g. `42s`, `3m`, `5h`, `2d`
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Format a percentage with one decimal
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "online" | "completed" | "idle" => status.green().to_string(),
        "degraded" | "queued" | "draining" => status.yellow().to_string(),
        "unhealthy" | "offline" | "failed" | "stopped_offline" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color priority based on value
pub fn color_priority(priority: &str) -> String {
    match priority {
        "high" => priority.red().bold().to_string(),
        "low" => priority.dimmed().to_string(),
        _ => priority.to_string(),
    }
}

/// Color a success rate: green at 95% and above, red below 80%
pub fn color_rate(rate: f64) -> String {
    let formatted = format_percent(rate);
    if rate >= 95.0 {
        formatted.green().to_string()
    } else if rate >= 80.0 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Shorten a request id for table display
pub fn truncate_id(id: &str) -> String {
    if id.chars().count() > 20 {
        let head: String = id.chars().take(17).collect();
        format!("{}...", head)
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::seconds(42), now), "42s");
        assert_eq!(format_age(now - Duration::minutes(3), now), "3m");
        assert_eq!(format_age(now - Duration::hours(5), now), "5h");
        assert_eq!(format_age(now - Duration::days(2), now), "2d");
        // Clock skew never renders negative ages
        assert_eq!(format_age(now + Duration::seconds(10), now), "0s");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(100.0), "100.0%");
        assert_eq!(format_percent(66.666), "66.7%");
    }

    #[test]
    fn test_truncate_id() {
        assert_eq!(truncate_id("req_1"), "req_1");
        assert_eq!(
            truncate_id("req_1700000000000_abc123xyz"),
            "req_1700000000000..."
        );
    }
}
