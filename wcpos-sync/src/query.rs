//! Live queries and their translation into REST parameters.

use crate::collection::Collection;
use crate::endpoint::{self, RestParams};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Selector field that only exists locally and is never sent to the server.
pub const LOCAL_ONLY_FIELD: &str = "uuid";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Filter, search and sort state of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    /// Top-level field selectors, e.g. `{"categories": 5, "id": {"$in": [1, 2]}}`.
    pub selector: Map<String, Value>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_direction: SortDirection,
}

impl QueryParams {
    #[must_use]
    pub fn with_selector(mut self, field: impl Into<String>, value: Value) -> Self {
        self.selector.insert(field.into(), value);
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    #[must_use]
    pub fn sorted_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by = Some(field.into());
        self.sort_direction = direction;
        self
    }
}

/// Translates query state into generic REST parameters.
pub fn to_rest_params(params: &QueryParams) -> RestParams {
    let mut rest = RestParams::new();
    if let Some(field) = &params.sort_by {
        rest.insert("orderby".to_string(), Value::String(field.clone()));
        rest.insert(
            "order".to_string(),
            Value::String(params.sort_direction.as_str().to_string()),
        );
    }
    if let Some(search) = params.search.as_deref().filter(|s| !s.is_empty()) {
        rest.insert("search".to_string(), Value::String(search.to_string()));
    }
    for (field, value) in &params.selector {
        if field == LOCAL_ONLY_FIELD {
            continue;
        }
        if field == "id" {
            if let Some(ids) = value.get("$in") {
                rest.insert("include".to_string(), ids.clone());
                continue;
            }
        }
        rest.insert(field.clone(), value.clone());
    }
    rest.insert("dates_are_gmt".to_string(), Value::Bool(true));
    rest
}

/// Rewrites generic parameters into what one resource's server expects.
pub type ParamHook = Arc<dyn Fn(RestParams) -> RestParams + Send + Sync>;

/// Per-resource parameter rewrites, keyed by collection name.
#[derive(Clone, Default)]
pub struct ParamHooks {
    hooks: HashMap<String, ParamHook>,
}

impl ParamHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` for `resource`, replacing any previous one.
    pub fn register<F>(&mut self, resource: impl Into<String>, hook: F)
    where
        F: Fn(RestParams) -> RestParams + Send + Sync + 'static,
    {
        self.hooks.insert(resource.into(), Arc::new(hook));
    }

    #[must_use]
    pub fn with<F>(mut self, resource: impl Into<String>, hook: F) -> Self
    where
        F: Fn(RestParams) -> RestParams + Send + Sync + 'static,
    {
        self.register(resource, hook);
        self
    }

    pub fn apply(&self, resource: &str, params: RestParams) -> RestParams {
        match self.hooks.get(resource) {
            Some(hook) => hook(params),
            None => params,
        }
    }

    /// Resolves the REST endpoint for `params` against `base`.
    pub fn resolve(&self, resource: &str, base: &str, params: &QueryParams) -> String {
        endpoint::build(base, &self.apply(resource, to_rest_params(params)))
    }
}

impl fmt::Debug for ParamHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamHooks")
            .field("resources", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Stable identity of a query key. Object keys serialize sorted, so equal
/// keys always produce the same id.
pub fn query_id(key: &Value) -> String {
    key.to_string()
}

/// A live query over one collection.
pub struct Query {
    id: String,
    collection: Arc<Collection>,
    endpoint: String,
    greedy: bool,
    params: watch::Sender<QueryParams>,
    cancel: CancellationToken,
}

impl Query {
    pub fn new(
        id: impl Into<String>,
        collection: Arc<Collection>,
        endpoint: impl Into<String>,
        greedy: bool,
        params: QueryParams,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            collection,
            endpoint: endpoint.into(),
            greedy,
            params: watch::channel(params).0,
            cancel: parent.child_token(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    /// Base endpoint the query's filters are applied to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_greedy(&self) -> bool {
        self.greedy
    }

    pub fn params(&self) -> QueryParams {
        self.params.borrow().clone()
    }

    /// Replaces the query state. Subscribers are only woken on a change.
    pub fn set_params(&self, params: QueryParams) {
        self.params.send_if_modified(|current| {
            if *current == params {
                false
            } else {
                *current = params;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryParams> {
        self.params.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("collection", &self.collection.name())
            .field("endpoint", &self.endpoint)
            .field("greedy", &self.greedy)
            .finish_non_exhaustive()
    }
}
