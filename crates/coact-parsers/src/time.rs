//! Time parsing utilities for scheduler and backend timestamps.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::time::Duration;

/// Parse a timestamp into UTC.
///
/// Accepts:
/// - epoch seconds (`SLURM_TIME_FORMAT=%s`)
/// - RFC 3339 with an offset, converted to UTC
/// - ISO-8601 without an offset (`YYYY-MM-DDTHH:MM:SS[.fff]`), taken as UTC
///
/// Returns None for empty strings or placeholder values like "N/A", "Unknown", "None".
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "Unknown" || s == "None" {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Format a timestamp as UTC ISO-8601 with millisecond precision and a `Z` suffix.
pub fn format_timestamp_millis(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an sacct `Elapsed` value: `[D-][HH:]MM:SS` with an optional
/// fractional second, or plain seconds.
///
/// Returns None for "UNLIMITED", placeholders, malformed or overflowing values.
pub fn parse_elapsed(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || s == "UNLIMITED" || s == "-" {
        return None;
    }
    let s = s.split_once('.').map_or(s, |(whole, _)| whole);

    let (days, clock) = match s.split_once('-') {
        Some((days, clock)) => (days.parse::<u64>().ok()?, clock),
        None => (0, s),
    };

    let fields: Vec<&str> = clock.split(':').collect();
    if fields.len() > 3 {
        return None;
    }
    let seconds = fields.iter().try_fold(0u64, |acc, field| {
        acc.checked_mul(60)?.checked_add(field.parse::<u64>().ok()?)
    })?;

    let total = days.checked_mul(86_400)?.checked_add(seconds)?;
    Some(Duration::from_secs(total))
}
