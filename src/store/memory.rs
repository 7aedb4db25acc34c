//! In-memory record store

use super::{query_documents, RecordStore, DEFAULT_RECORD_COLLECTION};
use crate::document::Document;
use crate::error::ComputeError;
use crate::types::{RawRecord, UserKey};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Store backed by owned documents
#[derive(Debug, Clone)]
pub struct MemoryStore {
    record_collection: String,
    collections: BTreeMap<String, Vec<Document>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RECORD_COLLECTION)
    }
}

impl MemoryStore {
    /// Create an empty store that answers record queries from `record_collection`
    pub fn new(record_collection: impl Into<String>) -> Self {
        let record_collection = record_collection.into();
        let mut collections = BTreeMap::new();
        collections.insert(record_collection.clone(), Vec::new());
        Self {
            record_collection,
            collections,
        }
    }

    /// Add a document to a collection, creating the collection if needed
    pub fn insert(&mut self, collection: &str, document: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// Add a document to the record collection
    pub fn insert_record(&mut self, document: Document) {
        let collection = self.record_collection.clone();
        self.insert(&collection, document);
    }
}

impl RecordStore for MemoryStore {
    fn find_by_key_and_window(
        &self,
        key: &UserKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, ComputeError> {
        let documents = self
            .collections
            .get(&self.record_collection)
            .cloned()
            .unwrap_or_default();
        query_documents(documents, key, start, end)
    }

    fn find_all(&self, collection: &str) -> Result<Vec<Document>, ComputeError> {
        Ok(self.collections.get(collection).cloned().unwrap_or_default())
    }

    fn list_collections(&self) -> Result<Vec<String>, ComputeError> {
        Ok(self.collections.keys().cloned().collect())
    }
}
