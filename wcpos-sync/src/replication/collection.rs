use super::{log_sync_error, ActiveGuard, SyncOptions, SyncPage};
use crate::collection::Collection;
use crate::config::SyncConfig;
use crate::endpoint;
use crate::error::{CancelReason, SyncError, SyncResult};
use crate::fetcher::{Fetcher, IdFilter};
use crate::http::HttpClient;
use crate::sync_state::SyncStateManager;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wcpos_types::{GmtTimestamp, LocalDocument};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct PauseState {
    explicit: bool,
    holds: usize,
}

impl PauseState {
    fn effective(&self) -> bool {
        self.explicit || self.holds > 0
    }
}

/// When a snapshot fetch last succeeded, on both clocks.
#[derive(Debug, Clone, Copy)]
struct FetchMark {
    at: Instant,
    started: GmtTimestamp,
}

/// Keeps one collection endpoint in step with the server.
///
/// Starts paused. [`start`](Self::start) spawns a poller that calls
/// [`run`](Self::run) every polling interval while unpaused; each run
/// performs a full audit when the full-fetch interval has elapsed and an
/// incremental poll otherwise.
pub struct CollectionReplicationState {
    collection: Arc<Collection>,
    endpoint: String,
    fetcher: Fetcher,
    sync_state: Arc<SyncStateManager>,
    config: SyncConfig,
    pause: Mutex<PauseState>,
    paused: watch::Sender<bool>,
    active: watch::Sender<bool>,
    first_sync: watch::Sender<bool>,
    /// Held for the duration of an audit or incremental cycle.
    cycle: tokio::sync::Mutex<()>,
    last_remote_state: Mutex<Option<FetchMark>>,
    last_remote_updates: Mutex<Option<FetchMark>>,
    cancel: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl CollectionReplicationState {
    pub fn new(
        collection: Arc<Collection>,
        endpoint: impl Into<String>,
        http: Arc<dyn HttpClient>,
        config: SyncConfig,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let endpoint = endpoint.into();
        let sync_state = Arc::new(SyncStateManager::new(
            endpoint.clone(),
            Arc::clone(collection.documents()),
            Arc::clone(collection.sync_records()),
            &config,
        ));
        Arc::new(Self {
            fetcher: Fetcher::new(http, endpoint.clone()),
            collection,
            endpoint,
            sync_state,
            config,
            pause: Mutex::new(PauseState {
                explicit: true,
                holds: 0,
            }),
            paused: watch::channel(true).0,
            active: watch::channel(false).0,
            first_sync: watch::channel(false).0,
            cycle: tokio::sync::Mutex::new(()),
            last_remote_state: Mutex::new(None),
            last_remote_updates: Mutex::new(None),
            cancel: parent.child_token(),
            poller: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn sync_state(&self) -> &Arc<SyncStateManager> {
        &self.sync_state
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ── Signals ─────────────────────────────────────────────────

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn has_first_synced(&self) -> bool {
        *self.first_sync.borrow()
    }

    pub fn subscribe_paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    /// Resolves once the first audit attempt has finished, successful or not.
    /// Returns `Closed` if the state is cancelled first.
    pub async fn first_sync(&self) -> SyncResult<()> {
        let mut rx = self.first_sync.subscribe();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Closed),
            ok = async { rx.wait_for(|done| *done).await.is_ok() } => {
                if ok { Ok(()) } else { Err(SyncError::Closed) }
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Unpauses and makes sure the poller is running.
    pub fn start(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.set_explicit_pause(false);

        let mut poller = lock(&self.poller);
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let paused = self.paused.subscribe();
        let cancel = self.cancel.clone();
        let period = self.config.polling_interval();
        *poller = Some(tokio::spawn(poll(weak, paused, cancel, period)));
    }

    pub fn pause(&self) {
        self.set_explicit_pause(true);
    }

    /// Pauses polling until the returned hold is dropped.
    pub fn hold(self: &Arc<Self>) -> ReplicationHold {
        {
            let mut pause = lock(&self.pause);
            pause.holds += 1;
            self.publish_pause(&pause);
        }
        ReplicationHold {
            state: Arc::clone(self),
        }
    }

    fn set_explicit_pause(&self, paused: bool) {
        let mut pause = lock(&self.pause);
        pause.explicit = paused;
        self.publish_pause(&pause);
    }

    fn release_hold(&self) {
        let mut pause = lock(&self.pause);
        pause.holds = pause.holds.saturating_sub(1);
        self.publish_pause(&pause);
    }

    fn publish_pause(&self, pause: &PauseState) {
        let paused = pause.effective();
        self.paused.send_if_modified(|current| {
            if *current == paused {
                false
            } else {
                *current = paused;
                true
            }
        });
    }

    /// Cancels the poller and any in-flight request. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.set_explicit_pause(true);
        if let Some(handle) = lock(&self.poller).take() {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Cycles ──────────────────────────────────────────────────

    /// Runs whichever cycle is due. `force` clears both fetch marks and
    /// unpauses first, so a full audit always follows.
    pub async fn run(&self, force: bool) -> SyncResult<()> {
        if force {
            *lock(&self.last_remote_state) = None;
            *lock(&self.last_remote_updates) = None;
            self.set_explicit_pause(false);
        }
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!(endpoint = %self.endpoint, "cycle already in flight");
            return Ok(());
        };

        let result = if self.audit_due() {
            self.audit_cycle().await
        } else if self.poll_due() {
            self.incremental_cycle().await
        } else {
            Ok(())
        };
        if let Err(err) = &result {
            log_sync_error(&self.endpoint, err);
        }
        result
    }

    fn audit_due(&self) -> bool {
        lock(&self.last_remote_state)
            .is_none_or(|mark| mark.at.elapsed() >= self.config.full_fetch_interval())
    }

    fn poll_due(&self) -> bool {
        self.latest_mark()
            .is_none_or(|mark| mark.at.elapsed() >= self.config.polling_interval())
    }

    fn latest_mark(&self) -> Option<FetchMark> {
        let updates = *lock(&self.last_remote_updates);
        updates.or_else(|| *lock(&self.last_remote_state))
    }

    async fn audit_cycle(&self) -> SyncResult<()> {
        let started = GmtTimestamp::now();
        let audited = async {
            let snapshot = self.fetcher.fetch_remote_state(&self.cancel).await?;
            self.ensure_live()?;
            let summary = self.sync_state.process_full_audit(&snapshot).await?;
            self.sync_state.remove_stale_records().await?;
            *lock(&self.last_remote_state) = Some(FetchMark {
                at: Instant::now(),
                started,
            });
            *lock(&self.last_remote_updates) = None;
            Ok::<_, SyncError>(summary)
        }
        .await;
        self.first_sync.send_replace(true);

        let summary = audited?;
        info!(
            endpoint = %self.endpoint,
            pull_new = summary.pull_new,
            pull_update = summary.pull_update,
            "audit complete"
        );
        self.update().await.map(|_| ())
    }

    async fn incremental_cycle(&self) -> SyncResult<()> {
        if lock(&self.last_remote_state).is_none() {
            return Ok(());
        }
        let Some(since) = self.latest_mark() else {
            return Ok(());
        };
        let started = GmtTimestamp::now();
        let delta = self
            .fetcher
            .fetch_remote_updates(since.started, &self.cancel)
            .await?;
        self.ensure_live()?;
        if !delta.is_empty() {
            self.sync_state.process_modified_after(&delta).await?;
        }
        *lock(&self.last_remote_updates) = Some(FetchMark {
            at: Instant::now(),
            started,
        });
        self.update().await.map(|_| ())
    }

    /// Re-fetches records known to be stale, or pulls new ones.
    pub async fn update(&self) -> SyncResult<SyncPage> {
        let updated = self.sync_state.get_updated_remote_ids().await?;
        if updated.is_empty() {
            self.sync(SyncOptions::default()).await
        } else {
            debug!(endpoint = %self.endpoint, count = updated.len(), "fetching updated records");
            self.sync(SyncOptions::forced(updated)).await
        }
    }

    /// Fetches full records by id and writes them locally.
    pub async fn sync(&self, options: SyncOptions) -> SyncResult<SyncPage> {
        let mut total = SyncPage::default();
        loop {
            let page = self.sync_once(&options).await?;
            total.add(page);
            let more = options.greedy
                && options.include.is_none()
                && page.written > 0
                && !self.cancel.is_cancelled();
            if !more {
                return Ok(total);
            }
        }
    }

    async fn sync_once(&self, options: &SyncOptions) -> SyncResult<SyncPage> {
        if self.is_paused() && !options.force {
            return Ok(SyncPage::default());
        }
        let Some(_active) = ActiveGuard::acquire(&self.active) else {
            return Ok(SyncPage::default());
        };

        let filter = match &options.include {
            Some(ids) if ids.is_empty() => return Ok(SyncPage::default()),
            Some(ids) => IdFilter::Include(ids.clone()),
            None => {
                let include = self.sync_state.get_unsynced_remote_ids().await?;
                if include.is_empty() {
                    return Ok(SyncPage::default());
                }
                let exclude = self.sync_state.get_synced_remote_ids().await?;
                IdFilter::choose(include, exclude)
            }
        };

        let params = endpoint::resource_params(&self.endpoint);
        let rows = self
            .fetcher
            .fetch_by_ids(&filter, &params, &self.cancel)
            .await?;
        let fetched = rows.len();
        let written = self.commit(rows, &self.cancel).await?;
        Ok(SyncPage { fetched, written })
    }

    /// Parses fetched rows and writes them through the sync state.
    pub(crate) async fn commit(
        &self,
        rows: Vec<Value>,
        cancel: &CancellationToken,
    ) -> SyncResult<usize> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                reason: CancelReason::Aborted,
            });
        }
        let parser = self.collection.parser();
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            match parser.parse(row) {
                Ok(doc) => docs.push(doc),
                Err(err) => warn!(endpoint = %self.endpoint, error = %err, "skipping record"),
            }
        }
        if docs.is_empty() {
            return Ok(0);
        }
        Ok(self.sync_state.process_server_response(docs).await?.len())
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled {
                reason: CancelReason::Aborted,
            })
        } else {
            Ok(())
        }
    }

    // ── Remote mutations ────────────────────────────────────────

    /// Sends a partial update for `doc` and merges the server's answer.
    pub async fn remote_patch(
        &self,
        doc: &LocalDocument,
        patch: Value,
    ) -> SyncResult<LocalDocument> {
        let path = endpoint::document_path(&self.endpoint, doc)?;
        let raw = self.fetcher.patch(&path, patch, &self.cancel).await?;
        self.ensure_live()?;
        let parsed = self.collection.parser().parse(raw)?;
        let fallback = parsed.clone();
        let written = self.sync_state.process_server_response(vec![parsed]).await?;
        Ok(written.into_iter().next().unwrap_or(fallback))
    }

    /// Creates `doc` on the server and swaps the local-only copy for the
    /// created record.
    pub async fn remote_create(&self, doc: &LocalDocument) -> SyncResult<LocalDocument> {
        let raw = self.fetcher.create(doc.data.clone(), &self.cancel).await?;
        self.ensure_live()?;
        let parsed = self.collection.parser().parse(raw)?;
        self.sync_state
            .process_created(doc.local_id.as_deref(), parsed)
            .await
    }
}

impl Drop for CollectionReplicationState {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keeps a [`CollectionReplicationState`] paused while alive.
pub struct ReplicationHold {
    state: Arc<CollectionReplicationState>,
}

impl Drop for ReplicationHold {
    fn drop(&mut self) {
        self.state.release_hold();
    }
}

async fn poll(
    state: Weak<CollectionReplicationState>,
    mut paused: watch::Receiver<bool>,
    cancel: CancellationToken,
    period: Duration,
) {
    loop {
        let resumed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            ok = async { paused.wait_for(|p| !*p).await.is_ok() } => ok,
        };
        if !resumed {
            return;
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if *paused.borrow_and_update() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let Some(state) = state.upgrade() else { return };
                    // failures are logged by run; the next tick retries
                    let _ = state.run(false).await;
                }
            }
        }
    }
}
