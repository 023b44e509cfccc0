//! Stateless REST calls against one endpoint.

use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, HttpRequest};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wcpos_types::{GmtTimestamp, RemoteId, ServerSnapshotRecord};

/// Which records a bulk fetch asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdFilter {
    Include(Vec<RemoteId>),
    Exclude(Vec<RemoteId>),
}

impl IdFilter {
    /// Picks the smaller payload: exclusion wins when it lists fewer ids.
    pub fn choose(include: Vec<RemoteId>, exclude: Vec<RemoteId>) -> Self {
        if exclude.len() < include.len() {
            IdFilter::Exclude(exclude)
        } else {
            IdFilter::Include(include)
        }
    }

    pub fn ids(&self) -> &[RemoteId] {
        match self {
            IdFilter::Include(ids) | IdFilter::Exclude(ids) => ids,
        }
    }

    fn body(&self) -> Value {
        match self {
            IdFilter::Include(ids) => json!({ "include": ids }),
            IdFilter::Exclude(ids) => json!({ "exclude": ids }),
        }
    }
}

/// HTTP-shaped calls for one resource path. Cheap to clone.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    endpoint: String,
}

impl Fetcher {
    pub fn new(client: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetches the id and modification time of every remote record.
    pub async fn fetch_remote_state(
        &self,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<ServerSnapshotRecord>> {
        self.fetch_snapshot(None, cancel).await
    }

    /// Fetches the id and modification time of records modified after
    /// `modified_after`.
    pub async fn fetch_remote_updates(
        &self,
        modified_after: GmtTimestamp,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<ServerSnapshotRecord>> {
        self.fetch_snapshot(Some(modified_after), cancel).await
    }

    async fn fetch_snapshot(
        &self,
        modified_after: Option<GmtTimestamp>,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<ServerSnapshotRecord>> {
        let mut request = HttpRequest::get(&self.endpoint)
            .query("fields[]", "id")
            .query("fields[]", "date_modified_gmt")
            .query("posts_per_page", "-1");
        if let Some(after) = modified_after {
            request = request.query("modified_after", after.to_string());
        }

        let response = self.client.send(request, cancel).await?;
        let rows = expect_array(response.body, &self.endpoint)?;
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    SyncError::MalformedResponse(format!(
                        "{}: bad snapshot row: {e}",
                        self.endpoint
                    ))
                })
            })
            .collect()
    }

    /// Fetches full records by id, tunnelling a GET through POST so large id
    /// lists fit in the body.
    pub async fn fetch_by_ids(
        &self,
        filter: &IdFilter,
        params: &[(String, String)],
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Value>> {
        let mut request = HttpRequest::post(&self.endpoint)
            .query("_method", "GET")
            .header("X-HTTP-Method-Override", "GET")
            .json(filter.body());
        for (key, value) in params {
            request = request.query(key.clone(), value.clone());
        }

        let response = self.client.send(request, cancel).await?;
        expect_array(response.body, &self.endpoint)
    }

    /// Sends a partial update for one record at `path`.
    pub async fn patch(
        &self,
        path: &str,
        body: Value,
        cancel: &CancellationToken,
    ) -> SyncResult<Value> {
        let response = self
            .client
            .send(HttpRequest::patch(path).json(body), cancel)
            .await?;
        expect_object(response.body, path)
    }

    /// Creates a record under this endpoint.
    pub async fn create(&self, body: Value, cancel: &CancellationToken) -> SyncResult<Value> {
        let path = crate::endpoint::path(&self.endpoint);
        let response = self
            .client
            .send(HttpRequest::post(path).json(body), cancel)
            .await?;
        expect_object(response.body, path)
    }
}

fn expect_array(body: Value, endpoint: &str) -> SyncResult<Vec<Value>> {
    match body {
        Value::Array(rows) => Ok(rows),
        other => Err(SyncError::MalformedResponse(format!(
            "{endpoint}: expected an array, got {}",
            kind(&other)
        ))),
    }
}

fn expect_object(body: Value, endpoint: &str) -> SyncResult<Value> {
    if body.is_object() {
        Ok(body)
    } else {
        Err(SyncError::MalformedResponse(format!(
            "{endpoint}: expected an object, got {}",
            kind(&body)
        )))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
