//! Source timestamp grammar
//!
//! Upstream timestamps arrive as naive strings and are interpreted as UTC.
//! A timestamp that matches neither the naive grammar nor RFC 3339 is a
//! malformed message, never retried.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Naive grammar used by the upstream ticketing system
const SOURCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a source-system timestamp.
///
/// Accepts the naive `YYYY-MM-DD hh:mm:ss` grammar (interpreted as UTC) and
/// RFC 3339 with an explicit offset.
pub fn parse_source_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, SOURCE_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    Err(Error::Malformed(format!("unrecognized timestamp: {raw}")))
}

/// Re-emit a timestamp with an explicit UTC indicator.
///
/// The fixed-width form sorts chronologically as a string, which the
/// conditional-guard UPDATE in the storage gateway relies on.
pub fn to_utc_string(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
