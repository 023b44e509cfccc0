//! Identifier types used by the sync core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned identifier of a REST record.
///
/// Local documents that have not been pushed yet carry no `RemoteId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(i64);

impl RemoteId {
    /// Wraps a raw server id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw server id.
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Reads a remote id out of a JSON value, accepting numbers and numeric
    /// strings. Zero and negative ids are treated as "not yet created".
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let raw = match value {
            serde_json::Value::Number(n) => n.as_i64()?,
            serde_json::Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (raw > 0).then_some(Self(raw))
    }
}

impl From<i64> for RemoteId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| crate::Error::InvalidId(s.to_string()))
    }
}
