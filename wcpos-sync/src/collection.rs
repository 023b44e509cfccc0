//! Collection descriptors.

use crate::error::{SyncError, SyncResult};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use wcpos_storage::{DocumentStore, SyncRecordStore};
use wcpos_types::LocalDocument;

/// Turns a REST record body into a local document.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, raw: Value) -> SyncResult<LocalDocument>;
}

/// Default parser: keeps the body as-is and reads `id` and
/// `date_modified_gmt` from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestParser;

impl ResponseParser for RestParser {
    fn parse(&self, raw: Value) -> SyncResult<LocalDocument> {
        if !raw.is_object() {
            return Err(SyncError::InvalidDocument("record is not an object".to_string()));
        }
        let doc = LocalDocument::from_rest(raw);
        if doc.id.is_none() {
            return Err(SyncError::InvalidDocument("record has no id".to_string()));
        }
        Ok(doc)
    }
}

/// A local collection and everything the engine needs to replicate it.
#[derive(Clone)]
pub struct Collection {
    name: String,
    endpoint: String,
    documents: Arc<dyn DocumentStore>,
    sync_records: Arc<dyn SyncRecordStore>,
    parser: Arc<dyn ResponseParser>,
}

impl Collection {
    /// Creates a collection whose endpoint equals its name.
    pub fn new(
        name: impl Into<String>,
        documents: Arc<dyn DocumentStore>,
        sync_records: Arc<dyn SyncRecordStore>,
    ) -> Self {
        let name = name.into();
        Self {
            endpoint: name.clone(),
            name,
            documents,
            sync_records,
            parser: Arc::new(RestParser),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default REST endpoint for the collection.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn sync_records(&self) -> &Arc<dyn SyncRecordStore> {
        &self.sync_records
    }

    pub fn parser(&self) -> &Arc<dyn ResponseParser> {
        &self.parser
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
