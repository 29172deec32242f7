//! Formatting helpers shared across front ends.

use chrono::{DateTime, Utc};

/// Normalize a raw model id (`claude-opus-4-1-20250805`) to its family name.
///
/// Unknown models are returned unchanged.
pub fn format_model(model: &str) -> String {
    if model.contains("opus") {
        "opus".to_string()
    } else if model.contains("sonnet") {
        "sonnet".to_string()
    } else if model.contains("haiku") {
        "haiku".to_string()
    } else {
        model.to_string()
    }
}

/// Render a token count compactly (`950`, `1.2K`, `3.4M`).
pub fn format_tokens(n: i64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format an ISO-8601 timestamp string as relative time, or `-` if it
/// is missing or unparseable.
pub fn format_relative_str(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| format_relative_time(dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| "-".to_string())
}

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
