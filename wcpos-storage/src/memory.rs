//! In-memory store implementations.
//!
//! Used by tests and by embedders that keep a collection in process memory.
//! Both stores are cheap to clone; clones share the same data.

use crate::{DocumentStore, StorageResult, SyncRecordStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use wcpos_types::{LocalDocument, RemoteId, SyncRecord, SyncStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Document store backed by a `Vec`, preserving insertion order.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    docs: Arc<Mutex<Vec<LocalDocument>>>,
    yielding: bool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation yield to the scheduler before touching the data,
    /// the way an I/O-backed store would suspend.
    #[must_use]
    pub fn with_yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    /// Adds documents directly, assigning local keys where missing.
    pub fn seed(&self, docs: impl IntoIterator<Item = LocalDocument>) {
        let mut guard = lock(&self.docs);
        guard.extend(docs.into_iter().map(assign_local_id));
    }

    /// Returns a copy of every stored document.
    pub fn snapshot(&self) -> Vec<LocalDocument> {
        lock(&self.docs).clone()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn pause(&self) {
        if self.yielding {
            tokio::task::yield_now().await;
        }
    }
}

fn assign_local_id(mut doc: LocalDocument) -> LocalDocument {
    if doc.local_id.is_none() {
        doc.local_id = Some(uuid::Uuid::new_v4().to_string());
    }
    doc
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_with_remote_id(&self) -> StorageResult<Vec<LocalDocument>> {
        self.pause().await;
        Ok(lock(&self.docs)
            .iter()
            .filter(|d| d.id.is_some())
            .cloned()
            .collect())
    }

    async fn find_by_remote_ids(&self, ids: &[RemoteId]) -> StorageResult<Vec<LocalDocument>> {
        self.pause().await;
        let wanted: HashSet<&RemoteId> = ids.iter().collect();
        Ok(lock(&self.docs)
            .iter()
            .filter(|d| d.id.as_ref().is_some_and(|id| wanted.contains(id)))
            .cloned()
            .collect())
    }

    async fn insert(&self, docs: Vec<LocalDocument>) -> StorageResult<Vec<LocalDocument>> {
        self.pause().await;
        let inserted: Vec<LocalDocument> = docs.into_iter().map(assign_local_id).collect();
        lock(&self.docs).extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn upsert(&self, docs: Vec<LocalDocument>) -> StorageResult<Vec<LocalDocument>> {
        self.pause().await;
        let mut guard = lock(&self.docs);
        let mut written = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let existing = doc
                .id
                .and_then(|id| guard.iter().position(|d| d.id == Some(id)));
            match existing {
                Some(pos) => {
                    doc.local_id = guard[pos].local_id.clone();
                    guard[pos] = doc.clone();
                }
                None => {
                    doc = assign_local_id(doc);
                    guard.push(doc.clone());
                }
            }
            written.push(doc);
        }
        Ok(written)
    }

    async fn remove_by_local_ids(&self, local_ids: &[String]) -> StorageResult<usize> {
        self.pause().await;
        let doomed: HashSet<&String> = local_ids.iter().collect();
        let mut guard = lock(&self.docs);
        let before = guard.len();
        guard.retain(|d| d.local_id.as_ref().is_none_or(|k| !doomed.contains(k)));
        Ok(before - guard.len())
    }

    async fn remove_by_remote_ids(&self, ids: &[RemoteId]) -> StorageResult<usize> {
        self.pause().await;
        let doomed: HashSet<&RemoteId> = ids.iter().collect();
        let mut guard = lock(&self.docs);
        let before = guard.len();
        guard.retain(|d| d.id.as_ref().is_none_or(|id| !doomed.contains(id)));
        Ok(before - guard.len())
    }

    async fn count(&self) -> StorageResult<usize> {
        Ok(self.len())
    }
}

/// Sync-record store backed by an ordered map.
#[derive(Clone, Default)]
pub struct MemorySyncRecordStore {
    records: Arc<Mutex<BTreeMap<(String, RemoteId), SyncStatus>>>,
}

impl MemorySyncRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record across all endpoints, ordered by endpoint then id.
    pub fn snapshot(&self) -> Vec<SyncRecord> {
        lock(&self.records)
            .iter()
            .map(|((endpoint, id), status)| SyncRecord::new(*id, endpoint.clone(), *status))
            .collect()
    }
}

#[async_trait]
impl SyncRecordStore for MemorySyncRecordStore {
    async fn find(
        &self,
        endpoint: &str,
        status: Option<SyncStatus>,
    ) -> StorageResult<Vec<SyncRecord>> {
        Ok(lock(&self.records)
            .iter()
            .filter(|((ep, _), s)| ep == endpoint && status.is_none_or(|wanted| wanted == **s))
            .map(|((ep, id), s)| SyncRecord::new(*id, ep.clone(), *s))
            .collect())
    }

    async fn upsert(&self, records: Vec<SyncRecord>) -> StorageResult<()> {
        let mut guard = lock(&self.records);
        for record in records {
            guard.insert((record.endpoint, record.id), record.status);
        }
        Ok(())
    }

    async fn remove(&self, endpoint: &str, ids: &[RemoteId]) -> StorageResult<usize> {
        let mut guard = lock(&self.records);
        Ok(ids
            .iter()
            .filter(|id| guard.remove(&(endpoint.to_string(), **id)).is_some())
            .count())
    }

    async fn clear(&self, endpoint: &str) -> StorageResult<usize> {
        let mut guard = lock(&self.records);
        let before = guard.len();
        guard.retain(|(ep, _), _| ep != endpoint);
        Ok(before - guard.len())
    }
}
