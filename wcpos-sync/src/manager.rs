//! Query and replication bookkeeping for one local store.
//!
//! A [`Manager`] owns every live query and the replication states serving
//! them. Replications are shared per endpoint string: two queries that
//! resolve to the same endpoint drive the same state.

use crate::collection::Collection;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use crate::query::{query_id, ParamHooks, Query, QueryParams};
use crate::registry::Registry;
use crate::replication::{CollectionReplicationState, QueryReplicationState, SyncPage};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options for [`Manager::register_query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Base endpoint; defaults to the collection's endpoint.
    pub endpoint: Option<String>,
    pub greedy: bool,
    pub params: QueryParams,
}

/// Any replication tracked by a manager.
#[derive(Clone)]
pub enum Replication {
    Collection(Arc<CollectionReplicationState>),
    Query(Arc<QueryReplicationState>),
}

impl Replication {
    pub fn endpoint(&self) -> &str {
        match self {
            Replication::Collection(r) => r.endpoint(),
            Replication::Query(r) => r.endpoint(),
        }
    }

    pub fn collection_name(&self) -> &str {
        match self {
            Replication::Collection(r) => r.collection().name(),
            Replication::Query(r) => r.parent().collection().name(),
        }
    }

    pub fn cancel(&self) {
        match self {
            Replication::Collection(r) => r.cancel(),
            Replication::Query(r) => r.cancel(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Replication::Collection(r) => r.is_cancelled(),
            Replication::Query(r) => r.is_cancelled(),
        }
    }
}

/// Owns the queries and replications for one store and transport.
pub struct Manager {
    http: Arc<dyn HttpClient>,
    config: SyncConfig,
    hooks: ParamHooks,
    queries: Registry<String, Arc<Query>>,
    collection_replications: Registry<String, Arc<CollectionReplicationState>>,
    query_replications: Registry<String, Arc<QueryReplicationState>>,
    active_collection_replications: Registry<String, Arc<CollectionReplicationState>>,
    active_query_replications: Registry<String, Arc<QueryReplicationState>>,
    cancel: CancellationToken,
}

impl Manager {
    pub fn new(http: Arc<dyn HttpClient>, config: SyncConfig) -> Arc<Self> {
        Self::with_hooks(http, config, ParamHooks::default())
    }

    pub fn with_hooks(
        http: Arc<dyn HttpClient>,
        config: SyncConfig,
        hooks: ParamHooks,
    ) -> Arc<Self> {
        Arc::new(Self {
            http,
            config,
            hooks,
            queries: Registry::new(),
            collection_replications: Registry::new(),
            query_replications: Registry::new(),
            active_collection_replications: Registry::new(),
            active_query_replications: Registry::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn queries(&self) -> &Registry<String, Arc<Query>> {
        &self.queries
    }

    pub fn collection_replications(&self) -> &Registry<String, Arc<CollectionReplicationState>> {
        &self.collection_replications
    }

    pub fn query_replications(&self) -> &Registry<String, Arc<QueryReplicationState>> {
        &self.query_replications
    }

    pub fn active_collection_replications(
        &self,
    ) -> &Registry<String, Arc<CollectionReplicationState>> {
        &self.active_collection_replications
    }

    pub fn active_query_replications(&self) -> &Registry<String, Arc<QueryReplicationState>> {
        &self.active_query_replications
    }

    /// Every tracked replication, keyed by endpoint.
    pub fn replications(&self) -> Vec<(String, Replication)> {
        let collections = self
            .collection_replications
            .entries()
            .into_iter()
            .map(|(k, r)| (k, Replication::Collection(r)));
        let queries = self
            .query_replications
            .entries()
            .into_iter()
            .map(|(k, r)| (k, Replication::Query(r)));
        collections.chain(queries).collect()
    }

    pub fn get_query(&self, id: &str) -> Option<Arc<Query>> {
        self.queries.get(&id.to_string())
    }

    pub fn collection_replication(
        &self,
        endpoint: &str,
    ) -> Option<Arc<CollectionReplicationState>> {
        self.collection_replications.get(&endpoint.to_string())
    }

    pub fn query_replication(&self, endpoint: &str) -> Option<Arc<QueryReplicationState>> {
        self.query_replications.get(&endpoint.to_string())
    }

    // ── Registration ────────────────────────────────────────────

    /// Registers a query under the identity of `key`, or returns the one
    /// already registered for it.
    ///
    /// A new query starts (or joins) the collection replication for its
    /// endpoint, and a background task provisions a query replication for
    /// each distinct set of params the query is given.
    pub fn register_query(
        self: &Arc<Self>,
        key: &Value,
        collection: Arc<Collection>,
        options: QueryOptions,
    ) -> SyncResult<Arc<Query>> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Closed);
        }
        let id = query_id(key);
        let endpoint = options
            .endpoint
            .unwrap_or_else(|| collection.endpoint().to_string());

        let (query, inserted) = self.queries.get_or_insert_with(id.clone(), || {
            Arc::new(Query::new(
                id.clone(),
                Arc::clone(&collection),
                endpoint.clone(),
                options.greedy,
                options.params,
                &self.cancel,
            ))
        });
        if !inserted {
            return Ok(query);
        }

        let parent = self.ensure_collection_replication(&collection, &endpoint);
        parent.start();
        self.active_collection_replications
            .insert(id.clone(), Arc::clone(&parent));
        self.watch_query(&query, parent);

        info!(
            query = %id,
            collection = %collection.name(),
            endpoint = %endpoint,
            "registered query"
        );
        Ok(query)
    }

    fn ensure_collection_replication(
        &self,
        collection: &Arc<Collection>,
        endpoint: &str,
    ) -> Arc<CollectionReplicationState> {
        let (replication, created) = self
            .collection_replications
            .get_or_insert_with(endpoint.to_string(), || {
                CollectionReplicationState::new(
                    Arc::clone(collection),
                    endpoint,
                    Arc::clone(&self.http),
                    self.config.clone(),
                    &self.cancel,
                )
            });
        if created {
            debug!(endpoint, "created collection replication");
        }
        replication
    }

    fn watch_query(self: &Arc<Self>, query: &Arc<Query>, parent: Arc<CollectionReplicationState>) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let weak_query: Weak<Query> = Arc::downgrade(query);
        let mut params = query.subscribe();
        let cancel = query.cancel_token().clone();

        tokio::spawn(async move {
            loop {
                let current = params.borrow_and_update().clone();
                {
                    let (Some(manager), Some(query)) = (manager.upgrade(), weak_query.upgrade())
                    else {
                        return;
                    };
                    manager.provision_query_replication(&query, &parent, &current);
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    changed = params.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Points `query` at the replication for its current params and kicks
    /// off a run.
    fn provision_query_replication(
        &self,
        query: &Arc<Query>,
        parent: &Arc<CollectionReplicationState>,
        params: &QueryParams,
    ) {
        if query.is_cancelled() || self.cancel.is_cancelled() {
            return;
        }
        let endpoint = self
            .hooks
            .resolve(query.collection().name(), query.endpoint(), params);
        let (replication, _) = self
            .query_replications
            .get_or_insert_with(endpoint.clone(), || {
                QueryReplicationState::new(
                    Arc::clone(parent),
                    Arc::clone(&self.http),
                    endpoint.clone(),
                    query.is_greedy(),
                    &self.cancel,
                )
            });

        let previous = self
            .active_query_replications
            .insert(query.id().to_string(), Arc::clone(&replication));
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &replication) {
                self.maybe_pause_query_replications(&previous);
            }
        }

        debug!(query = %query.id(), endpoint = %endpoint, "query replication provisioned");
        replication.start();
        tokio::spawn(async move {
            // failures are logged by run
            let _ = replication.run(false).await;
        });
    }

    /// Pauses `replication` unless some query still uses it.
    pub fn maybe_pause_query_replications(&self, replication: &Arc<QueryReplicationState>) {
        let in_use = self
            .active_query_replications
            .values()
            .iter()
            .any(|r| Arc::ptr_eq(r, replication));
        if !in_use {
            debug!(endpoint = %replication.endpoint(), "pausing unused query replication");
            replication.pause();
        }
    }

    fn maybe_pause_collection_replication(&self, replication: &Arc<CollectionReplicationState>) {
        let in_use = self
            .active_collection_replications
            .values()
            .iter()
            .any(|r| Arc::ptr_eq(r, replication));
        if !in_use {
            debug!(endpoint = %replication.endpoint(), "pausing unused collection replication");
            replication.pause();
        }
    }

    /// Re-runs the replication currently serving `id`. `force` re-opens a
    /// completed query.
    pub async fn refresh_query(&self, id: &str, force: bool) -> SyncResult<SyncPage> {
        let replication = self
            .active_query_replications
            .get(&id.to_string())
            .ok_or_else(|| SyncError::UnknownQuery(id.to_string()))?;
        replication.run(force).await
    }

    /// Cancels and forgets a query. Returns false if it was not registered.
    pub fn deregister_query(&self, id: &str) -> bool {
        let key = id.to_string();
        let Some(query) = self.queries.remove(&key) else {
            return false;
        };
        query.cancel();
        if let Some(replication) = self.active_query_replications.remove(&key) {
            self.maybe_pause_query_replications(&replication);
        }
        if let Some(replication) = self.active_collection_replications.remove(&key) {
            self.maybe_pause_collection_replication(&replication);
        }
        debug!(query = %id, "deregistered query");
        true
    }

    // ── Collection reset ────────────────────────────────────────

    /// Drops every query and replication bound to `collection`.
    pub fn on_collection_reset(&self, collection: &str) {
        let queries: Vec<String> = self
            .queries
            .entries()
            .into_iter()
            .filter(|(_, q)| q.collection().name() == collection)
            .map(|(id, _)| id)
            .collect();
        for id in &queries {
            self.deregister_query(id);
        }

        let mut cancelled = 0;
        for (endpoint, replication) in self.query_replications.entries() {
            if replication.parent().collection().name() == collection {
                self.query_replications.remove(&endpoint);
                replication.cancel();
                cancelled += 1;
            }
        }
        for (endpoint, replication) in self.collection_replications.entries() {
            if replication.collection().name() == collection {
                self.collection_replications.remove(&endpoint);
                replication.cancel();
                cancelled += 1;
            }
        }
        info!(
            collection,
            queries = queries.len(),
            replications = cancelled,
            "collection reset"
        );
    }

    /// Resets `collection`, then waits for `reappeared` to yield the
    /// recreated collection.
    pub async fn reset_collection<F>(
        &self,
        collection: &str,
        reappeared: F,
    ) -> SyncResult<Arc<Collection>>
    where
        F: Future<Output = Arc<Collection>>,
    {
        self.on_collection_reset(collection);
        let timeout = self.config.collection_reset_timeout();
        tokio::time::timeout(timeout, reappeared).await.map_err(|_| {
            warn!(collection, ?timeout, "collection did not reappear after reset");
            SyncError::Timeout
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Cancels every query and replication. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        for (_, query) in self.queries.clear() {
            query.cancel();
        }
        for (_, replication) in self.query_replications.clear() {
            replication.cancel();
        }
        for (_, replication) in self.collection_replications.clear() {
            replication.cancel();
        }
        self.active_query_replications.clear();
        self.active_collection_replications.clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the manager for the currently open store.
#[derive(Default)]
pub struct ManagerSlot {
    current: Mutex<Option<(String, Arc<Manager>)>>,
}

impl ManagerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the manager for `store_id`. Switching to another store
    /// cancels the previous manager before `build` runs.
    pub fn get_or_switch(
        &self,
        store_id: &str,
        build: impl FnOnce() -> Arc<Manager>,
    ) -> Arc<Manager> {
        let mut current = lock(&self.current);
        if let Some((id, manager)) = current.as_ref() {
            if id == store_id && !manager.is_cancelled() {
                return Arc::clone(manager);
            }
        }
        if let Some((id, previous)) = current.take() {
            info!(store = %id, "switching store, cancelling previous manager");
            previous.cancel();
        }
        let manager = build();
        *current = Some((store_id.to_string(), Arc::clone(&manager)));
        manager
    }

    pub fn current(&self) -> Option<Arc<Manager>> {
        lock(&self.current).as_ref().map(|(_, m)| Arc::clone(m))
    }

    pub fn store_id(&self) -> Option<String> {
        lock(&self.current).as_ref().map(|(id, _)| id.clone())
    }

    /// Cancels and drops the current manager.
    pub fn clear(&self) {
        if let Some((_, manager)) = lock(&self.current).take() {
            manager.cancel();
        }
    }
}
