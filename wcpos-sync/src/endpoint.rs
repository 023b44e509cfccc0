//! Endpoint strings.
//!
//! An endpoint is a REST resource path, optionally followed by an encoded
//! query string (`products?category=5&include[]=1&include[]=2`). Query
//! endpoints are built deterministically from sorted parameters so identical
//! filters always resolve to the same string and can share one replication.

use crate::error::{SyncError, SyncResult};
use serde_json::Value;
use std::collections::BTreeMap;
use wcpos_types::{LocalDocument, RemoteId};

/// REST query parameters, sorted by key.
pub type RestParams = BTreeMap<String, Value>;

/// Query keys that shape a listing without filtering it.
const NON_FILTER_KEYS: [&str; 5] = ["dates_are_gmt", "order", "orderby", "page", "per_page"];

/// Splits an endpoint into its path and raw query string.
pub fn split(endpoint: &str) -> (&str, Option<&str>) {
    match endpoint.split_once('?') {
        Some((path, query)) => (path.trim_matches('/'), Some(query).filter(|q| !q.is_empty())),
        None => (endpoint.trim_matches('/'), None),
    }
}

/// Returns the resource path without the query string.
pub fn path(endpoint: &str) -> &str {
    split(endpoint).0
}

/// Appends `params` to `base` as a bracketed-array query string.
pub fn build(base: &str, params: &RestParams) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        encode_value(&urlencoding::encode(key), value, &mut pairs);
    }
    if pairs.is_empty() {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{}", pairs.join("&"))
}

fn encode_value(key: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            let nested = format!("{key}[]");
            for item in items {
                encode_value(&nested, item, out);
            }
        }
        Value::Object(map) => {
            for (sub, item) in map {
                let nested = format!("{key}[{}]", urlencoding::encode(sub));
                encode_value(&nested, item, out);
            }
        }
        Value::String(s) => out.push(format!("{key}={}", urlencoding::encode(s))),
        Value::Bool(b) => out.push(format!("{key}={b}")),
        Value::Number(n) => out.push(format!("{key}={n}")),
    }
}

/// Decodes the query string of an endpoint into `(key, value)` pairs.
pub fn query_pairs(endpoint: &str) -> Vec<(String, String)> {
    let Some(query) = split(endpoint).1 else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Base key of a query pair: `include[]` and `include[0]` both yield
/// `include`.
fn base_key(key: &str) -> &str {
    key.split_once('[').map_or(key, |(base, _)| base)
}

/// IDs already encoded in the endpoint under `key` (`include`/`exclude`),
/// accepting bracketed arrays and comma-separated lists. `None` when the
/// key is absent.
pub fn encoded_ids(endpoint: &str, key: &str) -> Option<Vec<RemoteId>> {
    let mut found = false;
    let mut ids = Vec::new();
    for (k, v) in query_pairs(endpoint) {
        if base_key(&k) != key {
            continue;
        }
        found = true;
        ids.extend(v.split(',').filter_map(|part| part.parse::<RemoteId>().ok()));
    }
    found.then_some(ids)
}

/// True when the endpoint's query string narrows the listing beyond sort
/// and paging.
pub fn has_filters(endpoint: &str) -> bool {
    query_pairs(endpoint)
        .iter()
        .any(|(k, _)| !NON_FILTER_KEYS.contains(&base_key(k)))
}

/// True for `products/<parent_id>/variations`, a sub-resource scoped to one
/// parent whose audit listing never covers the whole collection.
pub fn is_nested_variations(endpoint: &str) -> bool {
    let segments: Vec<&str> = path(endpoint).split('/').collect();
    matches!(
        segments.as_slice(),
        ["products", parent, "variations"]
            if !parent.is_empty() && parent.chars().all(|c| c.is_ascii_digit())
    )
}

/// True for any product-variations listing, nested or not.
pub fn is_variations(endpoint: &str) -> bool {
    path(endpoint) == "products/variations" || is_nested_variations(endpoint)
}

/// True for the unfiltered `products/variations` listing, which must not be
/// fetched greedily.
pub fn is_unfiltered_variations_listing(endpoint: &str) -> bool {
    path(endpoint) == "products/variations" && !has_filters(endpoint)
}

/// Endpoints that only ever sync published records.
pub fn wants_published_only(endpoint: &str) -> bool {
    path(endpoint) == "products" || is_variations(endpoint)
}

/// Resource-specific parameters added to bulk fetches.
pub fn resource_params(endpoint: &str) -> Vec<(String, String)> {
    if wants_published_only(endpoint) {
        vec![("status".to_string(), "publish".to_string())]
    } else {
        Vec::new()
    }
}

/// Path of a single document under `endpoint`. Variations are addressed
/// through their parent product.
pub fn document_path(endpoint: &str, doc: &LocalDocument) -> SyncResult<String> {
    let id = doc
        .id
        .ok_or_else(|| SyncError::InvalidDocument("document has no remote id".to_string()))?;
    if is_variations(endpoint) {
        let parent = doc.int_field("parent_id").ok_or_else(|| {
            SyncError::InvalidDocument(format!("variation {id} has no parent_id"))
        })?;
        return Ok(format!("products/{parent}/variations/{id}"));
    }
    Ok(format!("{}/{id}", path(endpoint)))
}
