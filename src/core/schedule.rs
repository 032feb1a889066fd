//! Human-readable durations for periodicity, lifetime and timer settings.
//!
//! Durations are written as a sequence of `<number><unit>` pairs, for example
//! `"30s"`, `"5m"`, `"1h30m"` or `"1d"`. Supported units are `ns`, `us`, `ms`,
//! `s`, `m`, `h` and `d`. Formatting is exact, so every [`Duration`] survives a
//! round trip through its string form.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

/// Errors that can occur when parsing a duration string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DurationError {
    /// The string is not a sequence of `<number><unit>` pairs.
    #[error("invalid duration '{0}': expected e.g. 30s, 5m, 1h30m, 1d")]
    Invalid(String),

    /// The string uses a unit that is not supported.
    #[error("invalid duration '{0}': unknown unit '{1}'")]
    UnknownUnit(String, String),

    /// The total does not fit in a [`Duration`].
    #[error("invalid duration '{0}': too large")]
    Overflow(String),
}

/// Parse a duration string like "500ms", "5m", "1h30m" or "1d".
///
/// A zero total is accepted here; callers that need a positive duration
/// validate that themselves.
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Invalid(s.to_string()));
    }

    let mut total = Duration::ZERO;
    let mut chars = trimmed.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
            number.push(c);
            chars.next();
        }

        let mut unit = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_alphabetic) {
            unit.push(c);
            chars.next();
        }

        if number.is_empty() || unit.is_empty() {
            return Err(DurationError::Invalid(s.to_string()));
        }

        let value: u64 = number
            .parse()
            .map_err(|_| DurationError::Invalid(s.to_string()))?;

        let overflow = || DurationError::Overflow(s.to_string());
        let part = match unit.as_str() {
            "ns" => Duration::from_nanos(value),
            "us" => Duration::from_micros(value),
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(overflow)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(overflow)?),
            "d" => Duration::from_secs(value.checked_mul(86400).ok_or_else(overflow)?),
            _ => return Err(DurationError::UnknownUnit(s.to_string(), unit)),
        };
        total = total.checked_add(part).ok_or_else(overflow)?;
    }

    Ok(total)
}

/// Format a duration in the same notation [`parse_duration`] accepts.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let mut secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    let mut out = String::new();

    for (unit, size) in [("d", 86400), ("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    for (unit, size, modulo) in [("ms", 1_000_000, 1000), ("us", 1000, 1000), ("ns", 1, 1000)] {
        let value = (nanos / size) % modulo;
        if value > 0 {
            out.push_str(&format!("{}{}", value, unit));
        }
    }
    out
}

/// Serde adapter storing a [`Duration`] as a human-readable string.
pub mod humane {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for an optional human-readable [`Duration`].
pub mod humane_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
