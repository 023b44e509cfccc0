//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replication timing and batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum time between full audits (seconds).
    pub full_fetch_interval_secs: u64,
    /// Minimum time between incremental polls (seconds).
    pub polling_interval_secs: u64,
    /// Local documents compared per audit batch.
    pub audit_batch_size: usize,
    /// `PULL_NEW` records written per batch during an audit.
    pub new_records_batch_size: usize,
    /// How long a collection reset waits for the collection to reappear (ms).
    pub collection_reset_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_fetch_interval_secs: 60 * 60,
            polling_interval_secs: 5 * 60,
            audit_batch_size: 1000,
            new_records_batch_size: 500,
            collection_reset_timeout_ms: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn full_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.full_fetch_interval_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn collection_reset_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_reset_timeout_ms)
    }
}

/// Settings for the reqwest-backed [`RestClient`](crate::RestClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// REST namespace root, e.g. `https://shop.example/wp-json/wcpos/v1`.
    pub base_url: String,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/wp-json/wcpos/v1".to_string(),
            timeout_secs: 60,
            user_agent: concat!("wcpos-sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
