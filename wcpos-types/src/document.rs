//! Local documents as seen by the replication engine.

use crate::{GmtTimestamp, RemoteId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document held by the local store.
///
/// `local_id` is the store's own primary key and is assigned on first insert.
/// `id` is the server id; it is `None` for documents created offline and not
/// yet pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDocument {
    #[serde(default)]
    pub local_id: Option<String>,
    pub id: Option<RemoteId>,
    pub date_modified_gmt: Option<GmtTimestamp>,
    /// Full record body as last written.
    pub data: Value,
}

impl LocalDocument {
    /// Builds a document from a REST record body, reading `id` and
    /// `date_modified_gmt` from the top-level object.
    #[must_use]
    pub fn from_rest(data: Value) -> Self {
        let id = data.get("id").and_then(RemoteId::from_json);
        let date_modified_gmt = data.get("date_modified_gmt").and_then(GmtTimestamp::from_json);
        Self {
            local_id: None,
            id,
            date_modified_gmt,
            data,
        }
    }

    /// Sets the local key.
    #[must_use]
    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }

    /// Returns true if the server already knows this document.
    pub fn is_remote(&self) -> bool {
        self.id.is_some()
    }

    /// Reads an integer field from the body (e.g. `parent_id`).
    pub fn int_field(&self, field: &str) -> Option<i64> {
        self.data.get(field).and_then(RemoteId::from_json).map(|id| id.get())
    }
}
