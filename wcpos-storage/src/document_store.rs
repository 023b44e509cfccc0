//! Local document store contract.

use crate::StorageResult;
use async_trait::async_trait;
use wcpos_types::{LocalDocument, RemoteId};

/// The subset of a local document collection the sync engine relies on.
///
/// Implementations must assign a `local_id` to documents inserted without
/// one, and `upsert` must match existing documents by remote id, keeping
/// their local key.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns every document that carries a remote id.
    async fn find_with_remote_id(&self) -> StorageResult<Vec<LocalDocument>>;

    /// Returns the documents whose remote id is in `ids`.
    async fn find_by_remote_ids(&self, ids: &[RemoteId]) -> StorageResult<Vec<LocalDocument>>;

    /// Inserts documents without checking for existing remote ids.
    async fn insert(&self, docs: Vec<LocalDocument>) -> StorageResult<Vec<LocalDocument>>;

    /// Inserts or replaces documents, matched by remote id.
    async fn upsert(&self, docs: Vec<LocalDocument>) -> StorageResult<Vec<LocalDocument>>;

    /// Removes documents by local key. Returns the number removed.
    async fn remove_by_local_ids(&self, local_ids: &[String]) -> StorageResult<usize>;

    /// Removes every document whose remote id is in `ids`. Returns the
    /// number removed.
    async fn remove_by_remote_ids(&self, ids: &[RemoteId]) -> StorageResult<usize>;

    /// Total number of documents, including local-only ones.
    async fn count(&self) -> StorageResult<usize>;
}
