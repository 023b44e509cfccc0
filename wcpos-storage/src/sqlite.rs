//! SQLite-backed sync-record store.
//!
//! Uses its own SQLite file so sync bookkeeping is isolated from the
//! document store. Blocking calls run on tokio's blocking pool.

use crate::{StorageError, StorageResult, SyncRecordStore};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use wcpos_types::{RemoteId, SyncRecord, SyncStatus};

/// Persistent store for sync records backed by SQLite.
#[derive(Clone)]
pub struct SqliteSyncRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSyncRecordStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened sync record store");
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sync_records (
                id INTEGER NOT NULL,
                endpoint TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (id, endpoint)
            );

            CREATE INDEX IF NOT EXISTS sync_records_endpoint_status
                ON sync_records (endpoint, status);
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await?
    }
}

fn read_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_record((id, endpoint, status): (i64, String, String)) -> StorageResult<SyncRecord> {
    let status: SyncStatus = status.parse()?;
    Ok(SyncRecord::new(RemoteId::new(id), endpoint, status))
}

#[async_trait]
impl SyncRecordStore for SqliteSyncRecordStore {
    async fn find(
        &self,
        endpoint: &str,
        status: Option<SyncStatus>,
    ) -> StorageResult<Vec<SyncRecord>> {
        let endpoint = endpoint.to_string();
        self.with_conn(move |conn| {
            let rows = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, endpoint, status FROM sync_records
                         WHERE endpoint = ?1 AND status = ?2 ORDER BY id",
                    )?;
                    let rows = stmt
                        .query_map(params![endpoint, status.as_str()], read_record)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, endpoint, status FROM sync_records
                         WHERE endpoint = ?1 ORDER BY id",
                    )?;
                    let rows = stmt
                        .query_map(params![endpoint], read_record)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };
            rows.into_iter().map(into_record).collect()
        })
        .await
    }

    async fn upsert(&self, records: Vec<SyncRecord>) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO sync_records (id, endpoint, status) \
                     VALUES (?1, ?2, ?3)",
                )?;
                for record in &records {
                    stmt.execute(params![
                        record.id.get(),
                        record.endpoint,
                        record.status.as_str()
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, endpoint: &str, ids: &[RemoteId]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let endpoint = endpoint.to_string();
        let ids: Vec<i64> = ids.iter().map(RemoteId::get).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            for chunk in ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "DELETE FROM sync_records WHERE endpoint = ? AND id IN ({placeholders})"
                );
                let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(chunk.len() + 1);
                values.push(endpoint.clone().into());
                values.extend(chunk.iter().map(|id| rusqlite::types::Value::from(*id)));
                removed += tx.execute(&sql, params_from_iter(values))?;
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn clear(&self, endpoint: &str) -> StorageResult<usize> {
        let endpoint = endpoint.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sync_records WHERE endpoint = ?1", params![endpoint])
                .map_err(StorageError::from)
        })
        .await
    }
}
