//! Per-collection reconciliation state.
//!
//! Compares local documents against server snapshots and persists a
//! [`SyncRecord`] status for every known remote id. All writes of server
//! records into the local store go through [`SyncStateManager::process_server_response`],
//! which is fully serialized per manager.

use crate::config::SyncConfig;
use crate::endpoint;
use crate::error::SyncResult;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wcpos_storage::{DocumentStore, SyncRecordStore};
use wcpos_types::{
    GmtTimestamp, LocalDocument, RemoteId, ServerSnapshotRecord, SyncRecord, SyncStatus,
};

/// Counts produced by one full audit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub synced: usize,
    pub pull_new: usize,
    pub pull_update: usize,
    pub push_update: usize,
    pub pull_delete: usize,
    pub duplicates_removed: usize,
    pub orphans_removed: usize,
}

impl AuditSummary {
    fn count(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Synced => self.synced += 1,
            SyncStatus::PullNew => self.pull_new += 1,
            SyncStatus::PullUpdate => self.pull_update += 1,
            SyncStatus::PushUpdate => self.push_update += 1,
            SyncStatus::PullDelete => self.pull_delete += 1,
        }
    }
}

/// Reconciles one endpoint's local documents with server truth.
pub struct SyncStateManager {
    endpoint: String,
    documents: Arc<dyn DocumentStore>,
    records: Arc<dyn SyncRecordStore>,
    audit_batch_size: usize,
    new_records_batch_size: usize,
    /// Serializes every write of server data into the local store.
    write_lock: Mutex<()>,
    yields: AtomicUsize,
}

impl SyncStateManager {
    pub fn new(
        endpoint: impl Into<String>,
        documents: Arc<dyn DocumentStore>,
        records: Arc<dyn SyncRecordStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            documents,
            records,
            audit_batch_size: config.audit_batch_size.max(1),
            new_records_batch_size: config.new_records_batch_size.max(1),
            write_lock: Mutex::new(()),
            yields: AtomicUsize::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn records(&self) -> &Arc<dyn SyncRecordStore> {
        &self.records
    }

    /// Number of times audits have yielded to the scheduler.
    pub fn yield_count(&self) -> usize {
        self.yields.load(Ordering::Relaxed)
    }

    async fn yield_now(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    fn record(&self, id: RemoteId, status: SyncStatus) -> SyncRecord {
        SyncRecord::new(id, self.endpoint.clone(), status)
    }

    /// Reconciles every local document against a complete server snapshot.
    ///
    /// Local documents are compared in batches of `audit_batch_size`, and
    /// new ids are written in batches of `new_records_batch_size`; the task
    /// yields after every batch.
    pub async fn process_full_audit(
        &self,
        snapshot: &[ServerSnapshotRecord],
    ) -> SyncResult<AuditSummary> {
        let server: HashMap<RemoteId, Option<GmtTimestamp>> = snapshot
            .iter()
            .map(|r| (r.id, r.date_modified_gmt))
            .collect();
        let nested = endpoint::is_nested_variations(&self.endpoint);
        let local = self.documents.find_with_remote_id().await?;

        let mut summary = AuditSummary::default();
        let mut seen: HashSet<RemoteId> = HashSet::with_capacity(local.len());

        for batch in local.chunks(self.audit_batch_size) {
            let mut duplicates = Vec::new();
            let mut records = Vec::with_capacity(batch.len());

            for doc in batch {
                let Some(id) = doc.id else { continue };
                if !seen.insert(id) {
                    if let Some(local_id) = &doc.local_id {
                        duplicates.push(local_id.clone());
                    }
                    continue;
                }
                let status = match server.get(&id) {
                    Some(remote) => SyncStatus::from_timestamps(doc.date_modified_gmt, *remote),
                    // a nested listing never holds the whole universe
                    None if nested => continue,
                    None => SyncStatus::PullDelete,
                };
                summary.count(status);
                records.push(self.record(id, status));
            }

            if !duplicates.is_empty() {
                warn!(
                    endpoint = %self.endpoint,
                    count = duplicates.len(),
                    "duplicate local records share a remote id, removing extras"
                );
                let _guard = self.write_lock.lock().await;
                summary.duplicates_removed +=
                    self.documents.remove_by_local_ids(&duplicates).await?;
            }

            self.records.upsert(records).await?;
            self.yield_now().await;
        }

        let mut new_ids = Vec::new();
        let mut queued = HashSet::new();
        for row in snapshot {
            if !seen.contains(&row.id) && queued.insert(row.id) {
                new_ids.push(row.id);
            }
        }
        for chunk in new_ids.chunks(self.new_records_batch_size) {
            let records = chunk
                .iter()
                .map(|id| self.record(*id, SyncStatus::PullNew))
                .collect();
            self.records.upsert(records).await?;
            summary.pull_new += chunk.len();
            self.yield_now().await;
        }

        if !nested {
            let orphans: Vec<RemoteId> = self
                .records
                .find(&self.endpoint, None)
                .await?
                .into_iter()
                .map(|r| r.id)
                .filter(|id| !seen.contains(id) && !server.contains_key(id))
                .collect();
            if !orphans.is_empty() {
                summary.orphans_removed = self.records.remove(&self.endpoint, &orphans).await?;
            }
        }

        info!(
            endpoint = %self.endpoint,
            server = snapshot.len(),
            local = seen.len(),
            pull_new = summary.pull_new,
            pull_update = summary.pull_update,
            push_update = summary.push_update,
            pull_delete = summary.pull_delete,
            "full audit processed"
        );
        Ok(summary)
    }

    /// Reconciles a small delta of recently modified server records.
    pub async fn process_modified_after(
        &self,
        delta: &[ServerSnapshotRecord],
    ) -> SyncResult<usize> {
        if delta.is_empty() {
            return Ok(0);
        }
        let ids: Vec<RemoteId> = delta.iter().map(|r| r.id).collect();
        let mut local: HashMap<RemoteId, Option<GmtTimestamp>> = HashMap::new();
        for doc in self.documents.find_by_remote_ids(&ids).await? {
            if let Some(id) = doc.id {
                local.entry(id).or_insert(doc.date_modified_gmt);
            }
        }

        let records: Vec<SyncRecord> = delta
            .iter()
            .map(|row| {
                let status = match local.get(&row.id) {
                    Some(local_ts) => SyncStatus::from_timestamps(*local_ts, row.date_modified_gmt),
                    None => SyncStatus::PullNew,
                };
                self.record(row.id, status)
            })
            .collect();
        let count = records.len();
        self.records.upsert(records).await?;
        debug!(endpoint = %self.endpoint, count, "processed modified-after delta");
        Ok(count)
    }

    /// Writes full server records into the local store and marks them
    /// `SYNCED`. Server records older than the local copy are dropped.
    ///
    /// Calls are serialized: a second call observes every write of the first.
    pub async fn process_server_response(
        &self,
        docs: Vec<LocalDocument>,
    ) -> SyncResult<Vec<LocalDocument>> {
        let _guard = self.write_lock.lock().await;
        self.write_server_docs(docs).await
    }

    /// Replaces a locally created document with the record the server
    /// created for it, keeping the local key.
    pub async fn process_created(
        &self,
        local_id: Option<&str>,
        mut doc: LocalDocument,
    ) -> SyncResult<LocalDocument> {
        let _guard = self.write_lock.lock().await;
        if let Some(local_id) = local_id {
            self.documents
                .remove_by_local_ids(&[local_id.to_string()])
                .await?;
            doc.local_id = Some(local_id.to_string());
        }
        let fallback = doc.clone();
        let written = self.write_server_docs(vec![doc]).await?;
        Ok(written.into_iter().next().unwrap_or(fallback))
    }

    async fn write_server_docs(&self, docs: Vec<LocalDocument>) -> SyncResult<Vec<LocalDocument>> {
        let mut incoming: Vec<LocalDocument> = Vec::with_capacity(docs.len());
        let mut positions: HashMap<RemoteId, usize> = HashMap::new();
        for doc in docs {
            let Some(id) = doc.id else {
                warn!(endpoint = %self.endpoint, "ignoring server record without id");
                continue;
            };
            match positions.get(&id) {
                Some(&pos) => incoming[pos] = doc,
                None => {
                    positions.insert(id, incoming.len());
                    incoming.push(doc);
                }
            }
        }
        if incoming.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<RemoteId> = positions.keys().copied().collect();
        let existing = self.documents.find_by_remote_ids(&ids).await?;

        let written = if existing.is_empty() {
            self.documents.insert(incoming).await?
        } else {
            let mut local: HashMap<RemoteId, Option<GmtTimestamp>> = HashMap::new();
            for doc in existing {
                if let Some(id) = doc.id {
                    local.entry(id).or_insert(doc.date_modified_gmt);
                }
            }
            let (fresh, stale): (Vec<_>, Vec<_>) = incoming.into_iter().partition(|doc| {
                doc.id
                    .and_then(|id| local.get(&id))
                    .is_none_or(|local_ts| doc.date_modified_gmt >= *local_ts)
            });
            if !stale.is_empty() {
                debug!(
                    endpoint = %self.endpoint,
                    count = stale.len(),
                    "kept newer local copies over server records"
                );
            }
            if fresh.is_empty() {
                Vec::new()
            } else {
                self.documents.upsert(fresh).await?
            }
        };

        let records = written
            .iter()
            .filter_map(|doc| doc.id)
            .map(|id| self.record(id, SyncStatus::Synced))
            .collect();
        self.records.upsert(records).await?;
        Ok(written)
    }

    /// Removes every `PULL_DELETE` record together with its local document.
    pub async fn remove_stale_records(&self) -> SyncResult<usize> {
        let stale: Vec<RemoteId> = self
            .records
            .find(&self.endpoint, Some(SyncStatus::PullDelete))
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let removed_records = self.records.remove(&self.endpoint, &stale).await?;
        let removed_docs = self.documents.remove_by_remote_ids(&stale).await?;
        if removed_records != removed_docs {
            warn!(
                endpoint = %self.endpoint,
                removed_records,
                removed_docs,
                "stale record removal count mismatch"
            );
        }
        info!(endpoint = %self.endpoint, count = removed_docs, "removed stale records");
        Ok(removed_docs)
    }

    async fn ids_with_status(&self, status: Option<SyncStatus>) -> SyncResult<Vec<RemoteId>> {
        Ok(self
            .records
            .find(&self.endpoint, status)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    /// Ids known on the server but not present locally (`PULL_NEW`).
    pub async fn get_unsynced_remote_ids(&self) -> SyncResult<Vec<RemoteId>> {
        self.ids_with_status(Some(SyncStatus::PullNew)).await
    }

    /// Ids whose local copy matches the server (`SYNCED`).
    pub async fn get_synced_remote_ids(&self) -> SyncResult<Vec<RemoteId>> {
        self.ids_with_status(Some(SyncStatus::Synced)).await
    }

    /// Ids whose server copy is newer (`PULL_UPDATE`).
    pub async fn get_updated_remote_ids(&self) -> SyncResult<Vec<RemoteId>> {
        self.ids_with_status(Some(SyncStatus::PullUpdate)).await
    }

    /// Ids whose local copy is newer (`PUSH_UPDATE`).
    pub async fn get_push_remote_ids(&self) -> SyncResult<Vec<RemoteId>> {
        self.ids_with_status(Some(SyncStatus::PushUpdate)).await
    }
}
