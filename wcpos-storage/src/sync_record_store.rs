//! Persisted sync-record contract.

use crate::StorageResult;
use async_trait::async_trait;
use wcpos_types::{RemoteId, SyncRecord, SyncStatus};

/// Storage for [`SyncRecord`]s, keyed by `(id, endpoint)`.
#[async_trait]
pub trait SyncRecordStore: Send + Sync {
    /// Returns the records for `endpoint`, optionally filtered by status,
    /// ordered by id.
    async fn find(
        &self,
        endpoint: &str,
        status: Option<SyncStatus>,
    ) -> StorageResult<Vec<SyncRecord>>;

    /// Creates or overwrites records.
    async fn upsert(&self, records: Vec<SyncRecord>) -> StorageResult<()>;

    /// Removes the records for `ids` under `endpoint`. Returns the number
    /// removed.
    async fn remove(&self, endpoint: &str, ids: &[RemoteId]) -> StorageResult<usize>;

    /// Removes every record under `endpoint`.
    async fn clear(&self, endpoint: &str) -> StorageResult<usize>;
}
