//! Grace periods and poll intervals written as `300ms`, `10s` or `1m30s`.

use crate::error::{Error, Result};
use std::time::Duration;

/// Parse a duration made of one or more `<number><unit>` parts.
///
/// Units are `ms`, `s`, `m` and `h`; parts add up, so `1m30s` is 90 seconds.
/// A bare number counts as seconds. Returns `None` for anything else,
/// including values that overflow.
///
/// ```
/// use devsup::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration_string("1m30s"), Some(Duration::from_secs(90)));
/// assert_eq!(parse_duration_string("10"), Some(Duration::from_secs(10)));
/// assert_eq!(parse_duration_string("10 parsecs"), None);
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().ok().map(Duration::from_secs);
    }

    let mut total_ms: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let millis_per_unit = match &rest[..unit_len] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            _ => return None,
        };
        rest = &rest[unit_len..];

        total_ms = total_ms.checked_add(value.checked_mul(millis_per_unit)?)?;
    }
    Some(Duration::from_millis(total_ms))
}

/// [`parse_duration_string`] for a named setting, with a config error that
/// points at the setting.
pub fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    parse_duration_string(value).ok_or_else(|| {
        Error::Config(format!(
            "invalid {} '{}' (expected e.g. 500ms, 10s, 1m30s)",
            field, value
        ))
    })
}
