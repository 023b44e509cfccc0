//! Replication state machines.
//!
//! A [`CollectionReplicationState`] keeps one whole collection in step with
//! its REST endpoint through audits and incremental polls. A
//! [`QueryReplicationState`] pulls the records matching one filtered view of
//! that collection first, then hands off to its parent.

mod collection;
mod query;

pub use collection::{CollectionReplicationState, ReplicationHold};
pub use query::QueryReplicationState;

use crate::error::SyncError;
use tokio::sync::watch;
use tracing::{debug, error};
use wcpos_types::RemoteId;

/// Options for a single bulk fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Fetch exactly these ids instead of the unsynced set.
    pub include: Option<Vec<RemoteId>>,
    /// Run even while paused.
    pub force: bool,
    /// Keep fetching until a page writes nothing.
    pub greedy: bool,
}

impl SyncOptions {
    pub fn forced(include: Vec<RemoteId>) -> Self {
        Self {
            include: Some(include),
            force: true,
            greedy: false,
        }
    }
}

/// Outcome of one bulk fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPage {
    /// Records returned by the server.
    pub fetched: usize,
    /// Records written to the local store.
    pub written: usize,
}

impl SyncPage {
    pub(crate) fn add(&mut self, other: SyncPage) {
        self.fetched += other.fetched;
        self.written += other.written;
    }
}

/// Logs a failed cycle. Cancellations and suspension are expected and only
/// traced at debug level.
pub(crate) fn log_sync_error(endpoint: &str, err: &SyncError) {
    if err.is_silent() {
        debug!(endpoint, error = %err, "sync interrupted");
    } else {
        error!(
            endpoint,
            code = err.code(),
            message = %err.message(),
            "sync failed"
        );
    }
}

/// Clears `active` when dropped, so every exit path leaves the state
/// eligible for the next cycle.
pub(crate) struct ActiveGuard<'a>(&'a watch::Sender<bool>);

impl<'a> ActiveGuard<'a> {
    /// Marks `active`, or returns `None` if it already was.
    pub(crate) fn acquire(active: &'a watch::Sender<bool>) -> Option<Self> {
        let acquired = active.send_if_modified(|value| {
            if *value {
                false
            } else {
                *value = true;
                true
            }
        });
        acquired.then_some(Self(active))
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}
