//! Offline-first REST replication for WCPOS.
//!
//! Keeps local collections in step with a WooCommerce REST API while the
//! app stays usable offline.
//!
//! # Architecture
//!
//! - **SyncStateManager**: compares local documents with server snapshots
//!   and persists a per-id status (`SYNCED`, `PULL_NEW`, `PULL_UPDATE`,
//!   `PUSH_UPDATE`, `PULL_DELETE`). All server writes into the local store
//!   go through it and are serialized.
//! - **CollectionReplicationState**: polls one collection endpoint, running
//!   a full audit every hour and an incremental `modified_after` poll in
//!   between, then fetches whatever the audit marked as missing or stale.
//! - **QueryReplicationState**: fetches the records a filtered view needs
//!   first, pausing its parent collection replication while it writes.
//! - **Manager**: registers queries, shares replications between queries
//!   that resolve to the same endpoint, and tears everything down on reset.
//!
//! # Sync Cycle
//!
//! 1. **Audit**: `GET` every id and `date_modified_gmt` for the endpoint
//! 2. **Reconcile**: mark each id by comparing timestamps (last write wins)
//! 3. **Prune**: delete records the server no longer has
//! 4. **Fetch**: pull full records by include/exclude id lists
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use std::sync::Arc;
//! use wcpos_storage::{MemoryDocumentStore, MemorySyncRecordStore};
//! use wcpos_sync::{Collection, HttpConfig, Manager, QueryOptions, RestClient, SyncConfig};
//!
//! # async fn example() -> wcpos_sync::SyncResult<()> {
//! let http = Arc::new(RestClient::new(HttpConfig {
//!     base_url: "https://shop.example/wp-json/wcpos/v1".to_string(),
//!     ..Default::default()
//! })?);
//! let products = Arc::new(Collection::new(
//!     "products",
//!     Arc::new(MemoryDocumentStore::new()),
//!     Arc::new(MemorySyncRecordStore::new()),
//! ));
//!
//! let manager = Manager::new(http, SyncConfig::default());
//! let key = json!({ "collection": "products" });
//! let query = manager.register_query(&key, products, QueryOptions::default())?;
//! # let _ = query;
//! # Ok(())
//! # }
//! ```

mod collection;
mod config;
pub mod endpoint;
mod error;
mod fetcher;
mod http;
mod manager;
pub mod query;
mod registry;
pub mod replication;
mod sync_state;

pub use collection::{Collection, ResponseParser, RestParser};
pub use config::{HttpConfig, SyncConfig};
pub use error::{CancelReason, SyncError, SyncResult, SERVICE_UNAVAILABLE};
pub use fetcher::{Fetcher, IdFilter};
pub use http::{HttpClient, HttpRequest, HttpResponse, RestClient};
pub use manager::{Manager, ManagerSlot, QueryOptions, Replication};
pub use query::{ParamHooks, Query, QueryParams, SortDirection};
pub use registry::{Registry, RegistryEvent};
pub use replication::{
    CollectionReplicationState, QueryReplicationState, ReplicationHold, SyncOptions, SyncPage,
};
pub use sync_state::{AuditSummary, SyncStateManager};
pub use tokio_util::sync::CancellationToken;
