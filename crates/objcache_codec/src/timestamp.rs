//! Native temporal type for `createdAt` / `updatedAt` style fields.

use crate::error::{CodecError, CodecResult};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// A UTC instant with millisecond precision.
///
/// Millisecond precision matches what stores and wire peers exchange, so a
/// timestamp survives a round trip through RFC 3339 text or epoch millis
/// without drifting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current time, truncated to milliseconds.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Creates a timestamp from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self)
    }

    /// Creates a timestamp from a chrono instant, truncated to milliseconds.
    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self::from_millis(datetime.timestamp_millis()).unwrap_or(Self(datetime))
    }

    /// Parses an RFC 3339 string (any offset) into a UTC timestamp.
    pub fn parse_rfc3339(text: &str) -> CodecResult<Self> {
        DateTime::parse_from_rfc3339(text)
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
            .map_err(|e| CodecError::InvalidTimestamp(format!("{text}: {e}")))
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// RFC 3339 text in UTC with millisecond precision (the wire form).
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Returns the underlying chrono instant.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_roundtrip() {
        let ts = Timestamp::from_millis(1_700_000_000_123).unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
    }

    #[test]
    fn rfc3339_normalizes_offset() {
        let a = Timestamp::parse_rfc3339("2024-05-01T12:00:00.500+02:00").unwrap();
        let b = Timestamp::parse_rfc3339("2024-05-01T10:00:00.500Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_rfc3339(), "2024-05-01T10:00:00.500Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Timestamp::parse_rfc3339("yesterday"),
            Err(CodecError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn ordering_follows_time() {
        let early = Timestamp::from_millis(10).unwrap();
        let late = Timestamp::from_millis(20).unwrap();
        assert!(early < late);
    }
}
