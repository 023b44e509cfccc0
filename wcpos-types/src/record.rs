//! Sync bookkeeping records.

use crate::timestamp::{lenient, GmtTimestamp};
use crate::RemoteId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Reconciliation status of one remote id against the latest server snapshot.
///
/// The serialized names are persisted and must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Local copy matches the server.
    #[serde(rename = "SYNCED")]
    Synced,
    /// Known on the server, not present locally.
    #[serde(rename = "PULL_NEW")]
    PullNew,
    /// Server copy is newer than the local one.
    #[serde(rename = "PULL_UPDATE")]
    PullUpdate,
    /// Local copy is newer than the server one.
    #[serde(rename = "PUSH_UPDATE")]
    PushUpdate,
    /// Gone from the server; the local copy should be removed.
    #[serde(rename = "PULL_DELETE")]
    PullDelete,
}

impl SyncStatus {
    /// All statuses, in wire order.
    pub const ALL: [SyncStatus; 5] = [
        SyncStatus::Synced,
        SyncStatus::PullNew,
        SyncStatus::PullUpdate,
        SyncStatus::PushUpdate,
        SyncStatus::PullDelete,
    ];

    /// Returns the persisted string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "SYNCED",
            SyncStatus::PullNew => "PULL_NEW",
            SyncStatus::PullUpdate => "PULL_UPDATE",
            SyncStatus::PushUpdate => "PUSH_UPDATE",
            SyncStatus::PullDelete => "PULL_DELETE",
        }
    }

    /// Status of a record present both locally and on the server,
    /// last-write-wins by modification time. A missing timestamp sorts
    /// before any present one.
    #[must_use]
    pub fn from_timestamps(local: Option<GmtTimestamp>, remote: Option<GmtTimestamp>) -> Self {
        match remote.cmp(&local) {
            Ordering::Greater => SyncStatus::PullUpdate,
            Ordering::Less => SyncStatus::PushUpdate,
            Ordering::Equal => SyncStatus::Synced,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidStatus(s.to_string()))
    }
}

/// Persisted reconciliation state of one remote id, keyed by `(id, endpoint)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: RemoteId,
    pub endpoint: String,
    pub status: SyncStatus,
}

impl SyncRecord {
    pub fn new(id: RemoteId, endpoint: impl Into<String>, status: SyncStatus) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            status,
        }
    }
}

/// Minimal existence and freshness signal for one server record, as returned
/// by `fields[]=id&fields[]=date_modified_gmt` listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshotRecord {
    pub id: RemoteId,
    #[serde(default, with = "lenient")]
    pub date_modified_gmt: Option<GmtTimestamp>,
}

impl ServerSnapshotRecord {
    pub fn new(id: impl Into<RemoteId>, date_modified_gmt: Option<GmtTimestamp>) -> Self {
        Self {
            id: id.into(),
            date_modified_gmt,
        }
    }
}
