use super::{log_sync_error, ActiveGuard, CollectionReplicationState, SyncOptions, SyncPage};
use crate::endpoint;
use crate::error::SyncResult;
use crate::fetcher::{Fetcher, IdFilter};
use crate::http::HttpClient;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wcpos_types::RemoteId;

/// Pulls the records matching one filtered endpoint ahead of the rest of
/// the collection.
///
/// Once a filtered fetch comes back empty the query is complete and
/// further syncs are delegated to the parent collection replication.
pub struct QueryReplicationState {
    parent: Arc<CollectionReplicationState>,
    endpoint: String,
    fetcher: Fetcher,
    greedy: bool,
    sync_completed: AtomicBool,
    paused: watch::Sender<bool>,
    active: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl QueryReplicationState {
    pub fn new(
        parent: Arc<CollectionReplicationState>,
        http: Arc<dyn HttpClient>,
        endpoint: impl Into<String>,
        greedy: bool,
        cancel_parent: &CancellationToken,
    ) -> Arc<Self> {
        let endpoint = endpoint.into();
        Arc::new(Self {
            fetcher: Fetcher::new(http, endpoint.clone()),
            parent,
            endpoint,
            greedy,
            sync_completed: AtomicBool::new(false),
            paused: watch::channel(false).0,
            active: watch::channel(false).0,
            cancel: cancel_parent.child_token(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn parent(&self) -> &Arc<CollectionReplicationState> {
        &self.parent
    }

    pub fn is_greedy(&self) -> bool {
        self.greedy
    }

    pub fn is_sync_completed(&self) -> bool {
        self.sync_completed.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn subscribe_paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    pub fn start(&self) {
        self.paused.send_replace(false);
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Cancels any in-flight fetch. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.paused.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the parent's first audit, then fetches. Greedy queries keep
    /// fetching pages while they yield records.
    pub async fn run(&self, force: bool) -> SyncResult<SyncPage> {
        if force {
            self.sync_completed.store(false, Ordering::SeqCst);
            self.start();
        }
        let result = self.run_inner().await;
        if let Err(err) = &result {
            log_sync_error(&self.endpoint, err);
        }
        result
    }

    async fn run_inner(&self) -> SyncResult<SyncPage> {
        let ready = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            first = self.parent.first_sync() => first.is_ok(),
        };
        if !ready {
            return Ok(SyncPage::default());
        }

        let greedy = self.greedy && !endpoint::is_unfiltered_variations_listing(&self.endpoint);
        let mut total = SyncPage::default();
        loop {
            let page = self.sync().await?;
            total.add(page);
            // Pages are counted by written records. Rows dropped because the
            // local copy is newer are never excluded and would repeat forever.
            if !greedy || page.written == 0 || self.cancel.is_cancelled() {
                return Ok(total);
            }
        }
    }

    /// Fetches one page of this query's unsynced records.
    pub async fn sync(&self) -> SyncResult<SyncPage> {
        if self.is_paused() || self.cancel.is_cancelled() {
            return Ok(SyncPage::default());
        }
        if self.is_sync_completed() {
            return self.parent.sync(SyncOptions::default()).await;
        }
        let Some(_active) = ActiveGuard::acquire(&self.active) else {
            return Ok(SyncPage::default());
        };

        let state = self.parent.sync_state();
        let unsynced = state.get_unsynced_remote_ids().await?;
        let synced = state.get_synced_remote_ids().await?;
        let (include, exclude) = narrow(&self.endpoint, unsynced, synced);
        if include.is_empty() {
            // not terminal: an audit that has not succeeded yet leaves no records
            debug!(endpoint = %self.endpoint, "no unsynced records for query");
            return Ok(SyncPage::default());
        }

        let filter = IdFilter::choose(include, exclude);
        let params = endpoint::resource_params(&self.endpoint);
        let _hold = self.parent.hold();
        let rows = self
            .fetcher
            .fetch_by_ids(&filter, &params, &self.cancel)
            .await?;
        if rows.is_empty() {
            self.sync_completed.store(true, Ordering::SeqCst);
            return Ok(SyncPage::default());
        }
        let fetched = rows.len();
        let written = self.parent.commit(rows, &self.cancel).await?;
        Ok(SyncPage { fetched, written })
    }
}

impl Drop for QueryReplicationState {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Narrows the collection-wide id sets by any include/exclude list already
/// encoded in the query endpoint.
fn narrow(
    endpoint: &str,
    mut include: Vec<RemoteId>,
    mut exclude: Vec<RemoteId>,
) -> (Vec<RemoteId>, Vec<RemoteId>) {
    if let Some(wanted) = endpoint::encoded_ids(endpoint, "include") {
        let wanted: HashSet<RemoteId> = wanted.into_iter().collect();
        include.retain(|id| wanted.contains(id));
        exclude.retain(|id| wanted.contains(id));
    }
    if let Some(unwanted) = endpoint::encoded_ids(endpoint, "exclude") {
        let unwanted_set: HashSet<RemoteId> = unwanted.iter().copied().collect();
        include.retain(|id| !unwanted_set.contains(id));
        let known: HashSet<RemoteId> = exclude.iter().copied().collect();
        exclude.extend(unwanted.into_iter().filter(|id| !known.contains(id)));
    }
    (include, exclude)
}
