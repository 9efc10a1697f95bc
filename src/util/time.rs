//! Timestamp parsing, storage formatting and recency decay

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Convert a millisecond epoch timestamp to a UTC datetime.
pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Parse the timestamp shapes the supported tools write.
///
/// Accepts RFC 3339 strings, bare `YYYY-MM-DD` dates, and epoch numbers
/// (seconds or milliseconds, told apart by magnitude).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            // Anything below ~2001 in milliseconds is treated as seconds
            if raw.abs() < 1_000_000_000_000 {
                Utc.timestamp_opt(raw, 0).single()
            } else {
                ms_to_datetime(raw)
            }
        }
        _ => None,
    }
}

/// String-only variant of [`parse_timestamp`].
pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(num) = s.parse::<i64>() {
        return parse_timestamp(&Value::from(num));
    }
    None
}

/// Storage form: RFC 3339, UTC, millisecond precision, `Z` suffix.
///
/// Fixed width means string order equals chronological order in SQL.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Absolute distance between two instants in fractional days.
pub fn days_between(a: &DateTime<Utc>, b: &DateTime<Utc>) -> f64 {
    let ms = (*a - *b).num_milliseconds().abs() as f64;
    ms / MS_PER_DAY
}

/// Linear decay: 1.0 at zero distance, 0.0 at (and beyond) the window edge.
pub fn recency(days: f64, window_days: f64) -> f64 {
    if window_days <= 0.0 {
        return 0.0;
    }
    (1.0 - days / window_days).clamp(0.0, 1.0)
}
