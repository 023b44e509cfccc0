#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use wcpos_storage::{MemoryDocumentStore, MemorySyncRecordStore};
use wcpos_sync::{
    endpoint, CancelReason, CancellationToken, Collection, HttpClient, HttpRequest, HttpResponse,
    SyncError, SyncResult,
};
use wcpos_types::{GmtTimestamp, LocalDocument, RemoteId, SyncStatus};

pub const OLD: &str = "2024-01-01T10:00:00";
pub const MID: &str = "2024-02-01T10:00:00";
pub const NEW: &str = "2024-03-01T10:00:00";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ts(s: &str) -> GmtTimestamp {
    GmtTimestamp::parse(s).unwrap()
}

pub fn product(id: i64, modified: &str) -> Value {
    json!({ "id": id, "date_modified_gmt": modified, "name": format!("Product {id}") })
}

pub fn local(id: Option<i64>, modified: &str) -> LocalDocument {
    let data = match id {
        Some(id) => product(id, modified),
        None => json!({ "name": "Offline product", "date_modified_gmt": modified }),
    };
    LocalDocument::from_rest(data)
}

pub fn rid(id: i64) -> RemoteId {
    RemoteId::new(id)
}

pub fn rids(ids: &[i64]) -> Vec<RemoteId> {
    ids.iter().copied().map(RemoteId::new).collect()
}

/// Remote ids of every stored document, sorted.
pub fn stored_ids(store: &MemoryDocumentStore) -> Vec<i64> {
    let mut ids: Vec<i64> = store
        .snapshot()
        .iter()
        .filter_map(|d| d.id.map(|id| id.get()))
        .collect();
    ids.sort_unstable();
    ids
}

/// `(id, status)` pairs recorded for `endpoint`, ordered by id.
pub fn statuses(records: &MemorySyncRecordStore, endpoint: &str) -> Vec<(i64, SyncStatus)> {
    records
        .snapshot()
        .into_iter()
        .filter(|r| r.endpoint == endpoint)
        .map(|r| (r.id.get(), r.status))
        .collect()
}

pub struct Fixture {
    pub docs: MemoryDocumentStore,
    pub records: MemorySyncRecordStore,
    pub collection: Arc<Collection>,
}

pub fn fixture(name: &str) -> Fixture {
    let docs = MemoryDocumentStore::new();
    let records = MemorySyncRecordStore::new();
    let collection = Arc::new(Collection::new(
        name,
        Arc::new(docs.clone()),
        Arc::new(records.clone()),
    ));
    Fixture {
        docs,
        records,
        collection,
    }
}

// ── Fake REST server ─────────────────────────────────────────────

/// In-process stand-in for the WCPOS REST API.
pub struct FakeServer {
    records: Mutex<Vec<Value>>,
    page_size: Option<usize>,
    next_id: Mutex<i64>,
}

impl FakeServer {
    pub fn new(records: Vec<Value>) -> Arc<Self> {
        Self::paged(records, None)
    }

    pub fn paged(records: Vec<Value>, page_size: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            page_size,
            next_id: Mutex::new(1000),
        })
    }

    pub fn set_records(&self, records: Vec<Value>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn upsert(&self, record: Value) {
        let mut records = self.records.lock().unwrap();
        records.retain(|r| r["id"] != record["id"]);
        records.push(record);
    }

    fn matches_filters(record: &Value, path: &str) -> bool {
        endpoint::query_pairs(path).iter().all(|(key, value)| match key.as_str() {
            "category" => record["category"].to_string() == *value,
            "include" | "include[]" => value
                .split(',')
                .any(|id| record["id"].to_string() == id),
            _ => true,
        })
    }

    pub fn handle(&self, request: &HttpRequest) -> SyncResult<HttpResponse> {
        let records = self.records.lock().unwrap().clone();
        let path = endpoint::path(&request.path).to_string();

        if request.method == reqwest::Method::GET {
            let after = request
                .query_values("modified_after")
                .first()
                .map(|s| GmtTimestamp::parse(s).unwrap());
            let rows: Vec<Value> = records
                .iter()
                .filter(|r| Self::matches_filters(r, &request.path))
                .filter(|r| {
                    after.is_none_or(|after| {
                        GmtTimestamp::from_json(&r["date_modified_gmt"]).is_some_and(|m| m > after)
                    })
                })
                .map(|r| json!({ "id": r["id"], "date_modified_gmt": r["date_modified_gmt"] }))
                .collect();
            return Ok(HttpResponse::ok(Value::Array(rows)));
        }

        if request.method == reqwest::Method::POST && request.query_values("_method") == ["GET"] {
            let body = request.body.clone().unwrap_or(Value::Null);
            let listed = |key: &str| -> Option<Vec<Value>> { body.get(key)?.as_array().cloned() };
            let include = listed("include");
            let exclude = listed("exclude");
            let mut rows: Vec<Value> = records
                .into_iter()
                .filter(|r| Self::matches_filters(r, &request.path))
                .filter(|r| include.as_ref().is_none_or(|ids| ids.contains(&r["id"])))
                .filter(|r| exclude.as_ref().is_none_or(|ids| !ids.contains(&r["id"])))
                .collect();
            if let Some(size) = self.page_size {
                rows.truncate(size);
            }
            return Ok(HttpResponse::ok(Value::Array(rows)));
        }

        if request.method == reqwest::Method::PATCH {
            let id: i64 = path.rsplit('/').next().unwrap().parse().unwrap();
            let mut record = records
                .into_iter()
                .find(|r| r["id"] == json!(id))
                .unwrap_or_else(|| json!({ "id": id }));
            if let (Some(target), Some(Value::Object(patch))) =
                (record.as_object_mut(), request.body.clone())
            {
                target.extend(patch);
                target.insert("date_modified_gmt".into(), json!(NEW));
            }
            self.upsert(record.clone());
            return Ok(HttpResponse::ok(record));
        }

        if request.method == reqwest::Method::POST {
            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                *next
            };
            let mut record = request.body.clone().unwrap_or_else(|| json!({}));
            record["id"] = json!(id);
            record["date_modified_gmt"] = json!(NEW);
            self.upsert(record.clone());
            return Ok(HttpResponse::ok(record));
        }

        Err(SyncError::Server {
            status: 405,
            code: Some("rest_no_route".into()),
            message: None,
        })
    }
}

// ── Scripted transport ───────────────────────────────────────────

type Handler = Box<dyn Fn(&HttpRequest) -> SyncResult<HttpResponse> + Send + Sync>;

/// Records every request and answers through a handler.
pub struct ScriptedHttp {
    requests: Mutex<Vec<HttpRequest>>,
    handler: Handler,
}

impl ScriptedHttp {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> SyncResult<HttpResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    pub fn serving(server: Arc<FakeServer>) -> Arc<Self> {
        Self::new(move |request| server.handle(request))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Bulk include/exclude fetches, in order.
    pub fn bulk_requests(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.query_values("_method") == ["GET"])
            .collect()
    }

    /// Snapshot (audit or delta) fetches, in order.
    pub fn snapshot_requests(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == reqwest::Method::GET)
            .collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> SyncResult<HttpResponse> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                reason: CancelReason::Aborted,
            });
        }
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        (self.handler)(&request)
    }
}
