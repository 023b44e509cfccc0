//! Core type definitions for WCPOS offline sync.
//!
//! This crate defines the plain data model shared by the storage seams and
//! the replication engine:
//! - Remote record identifiers
//! - GMT modification timestamps as the server reports them
//! - Per-record sync status and the persisted `SyncRecord`
//! - The minimal server snapshot row used by audits
//! - Local documents as the replication engine sees them

mod document;
mod ids;
mod record;
mod timestamp;

pub use document::LocalDocument;
pub use ids::RemoteId;
pub use record::{ServerSnapshotRecord, SyncRecord, SyncStatus};
pub use timestamp::GmtTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("invalid remote id: {0}")]
    InvalidId(String),
}
