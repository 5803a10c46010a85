//! Retry-After header parsing
//!
//! The header is either a number of seconds or an HTTP-date (RFC 7231).

use std::time::Duration;
use tracing::debug;

/// Parse a `Retry-After` header value into the number of seconds to wait.
///
/// Numeric values are tried first, then HTTP-dates. Dates in the past mean
/// "retry immediately" and yield `Some(0)`.
///
/// # Examples
/// ```
/// use manuscripta_core::retry_after::parse_retry_after;
///
/// assert_eq!(parse_retry_after("60"), Some(60));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    if let Ok(seconds) = header_value.trim().parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(target_time) = chrono::DateTime::parse_from_rfc2822(header_value.trim()) {
        let remaining = target_time.signed_duration_since(chrono::Utc::now());
        let seconds = remaining.num_seconds().max(0) as u64;
        debug!(retry_after_seconds = seconds, target_time = %target_time, "Parsed HTTP-date retry-after");
        return Some(seconds);
    }

    debug!(header_value, "Unparseable retry-after header");
    None
}

/// [`parse_retry_after`] as a `Duration`
pub fn retry_after_duration(header_value: &str) -> Option<Duration> {
    parse_retry_after(header_value).map(Duration::from_secs)
}
