//! Store seams for WCPOS offline sync.
//!
//! The replication engine never touches storage directly; it goes through
//! two traits:
//!
//! - [`DocumentStore`]: the local document collection (owned by the
//!   embedding application). Only the query/insert/upsert/remove primitives
//!   the engine needs are part of the contract.
//! - [`SyncRecordStore`]: persisted per-id reconciliation status, one logical
//!   store per collection, keyed by `(id, endpoint)`.
//!
//! In-memory implementations of both are provided, plus a SQLite-backed
//! `SyncRecordStore` whose rows survive restarts.

mod document_store;
mod error;
mod memory;
mod sqlite;
mod sync_record_store;

pub use document_store::DocumentStore;
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryDocumentStore, MemorySyncRecordStore};
pub use sqlite::SqliteSyncRecordStore;
pub use sync_record_store::SyncRecordStore;
