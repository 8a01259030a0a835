//! Timestamp helpers.
//!
//! All stores persist timestamps as RFC 3339 UTC strings with a fixed
//! microsecond precision so that `ORDER BY` and `<` comparisons on the text
//! column agree with chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current time, formatted for storage.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Parse a stored timestamp.
///
/// Returns `None` for anything that is not RFC 3339.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
