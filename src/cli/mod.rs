//! Subcommand implementations, one file each

pub mod autolink;
pub mod commits;
pub mod context;
pub mod conversations;
pub mod hook;
pub mod link;
pub mod links;
pub mod read;
pub mod search;
pub mod sources;
pub mod stats;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::util::parse_timestamp_str;

/// First line of `text`, cut to `max` characters
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > max {
        let head: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}

pub(crate) fn short_hash(hash: &str) -> &str {
    hash.get(..10).unwrap_or(hash)
}

pub(crate) fn display_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// Parse a `--since`/`--until` value: RFC 3339 or `YYYY-MM-DD`
pub fn parse_date_arg(raw: &str) -> Result<DateTime<Utc>> {
    parse_timestamp_str(raw)
        .with_context(|| format!("Invalid date '{}', expected RFC 3339 or YYYY-MM-DD", raw))
}
