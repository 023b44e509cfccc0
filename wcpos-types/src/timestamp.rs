//! GMT modification timestamps.
//!
//! The REST API reports `date_modified_gmt` as an ISO-8601 wall-clock string
//! without a timezone suffix (`2024-03-01T10:15:00`). Timestamps are compared
//! at second precision; fractional seconds and a trailing `Z` are accepted on
//! input and dropped.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Wire format used for `date_modified_gmt` and `modified_after`.
pub const GMT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A second-precision GMT timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GmtTimestamp(NaiveDateTime);

impl GmtTimestamp {
    /// Returns the current time, truncated to whole seconds.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Converts a UTC datetime, truncating sub-second precision.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let naive = dt.naive_utc();
        Self(naive.with_nanosecond(0).unwrap_or(naive))
    }

    /// Returns the underlying naive GMT datetime.
    #[must_use]
    pub const fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    /// Parses the server representation.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let trimmed = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::from_datetime(dt.with_timezone(&Utc)));
        }
        let naive = trimmed.trim_end_matches('Z');
        NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|dt| Self(dt.with_nanosecond(0).unwrap_or(dt)))
            .map_err(|_| crate::Error::InvalidTimestamp(s.to_string()))
    }

    /// Reads an optional timestamp out of a JSON value. `null`, empty strings
    /// and unparseable values yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        value.as_str().and_then(|s| Self::parse(s).ok())
    }
}

impl fmt::Display for GmtTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(GMT_FORMAT))
    }
}

impl FromStr for GmtTimestamp {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for GmtTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GmtTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for optional timestamps where the server may send `null`
/// or an empty string.
pub(crate) mod lenient {
    use super::GmtTimestamp;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<GmtTimestamp>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.collect_str(ts),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<GmtTimestamp>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => GmtTimestamp::parse(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
