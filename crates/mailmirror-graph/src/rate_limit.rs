//! `Retry-After` header parsing
//!
//! Graph sends `Retry-After` with 429 and some 503 responses, usually as
//! integer seconds and occasionally as an HTTP date.

use std::time::Duration;

use tracing::warn;

/// Delay used when a `Retry-After` header is present but unreadable
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Dates further out than this are treated as unreadable
const MAX_RETRY_AFTER_SECS: u64 = 3600;

/// Parses a `Retry-After` value as seconds or an RFC 2822 date
///
/// Falls back to `default` when the value is neither, or names a date in
/// the past or more than an hour away.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let remaining = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Some(secs) = u64::try_from(remaining.num_seconds())
            .ok()
            .filter(|&s| s > 0 && s <= MAX_RETRY_AFTER_SECS)
        {
            return Duration::from_secs(secs);
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
