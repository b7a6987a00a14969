//! Timestamp parsing for collector payloads.
//!
//! The collector is not consistent about timestamp shape: bulk records carry
//! RFC 3339 or naive ISO-8601 strings, while events streamed straight from
//! sshd logs carry the syslog prefix (`Oct 28 10:15:23`) with no year.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

/// Parse a collector timestamp, assuming UTC when no offset is present.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    parse_syslog(raw, Utc::now().year())
}

/// Syslog timestamps have no year; the caller supplies it.
fn parse_syslog(raw: &str, year: i32) -> Option<DateTime<Utc>> {
    // "Oct  5 10:15:23" pads single-digit days with a space
    let normalized = raw.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&format!("{} {}", year, normalized), "%Y %b %d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// serde helper for a required timestamp field. Missing or unreadable values
/// fall back to the Unix epoch and are repaired during normalization.
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp).unwrap_or_default())
}

/// serde helper for a list of timestamps; unreadable entries are skipped.
pub fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.as_deref().and_then(parse_timestamp))
        .collect())
}
