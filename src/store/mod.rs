//! Record storage
//!
//! The pipeline reads records through the `RecordStore` trait so the backing
//! database stays swappable. Two implementations ship with the crate: an
//! in-memory store and a directory of exported collection files.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::document::{self, Document};
use crate::error::ComputeError;
use crate::types::{RawRecord, UserKey};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Collection that holds per-user daily records unless configured otherwise
pub const DEFAULT_RECORD_COLLECTION: &str = "dashboards";

/// Trait for record storage backends
///
/// Implementations must be safe to share across requests; none of the
/// methods mutate stored data.
pub trait RecordStore: Send + Sync {
    /// Records whose key equals `key` and whose `createdAt` lies in
    /// `[start, end)`, ascending by `createdAt`
    fn find_by_key_and_window(
        &self,
        key: &UserKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, ComputeError>;

    /// Every document in a collection, in stored order
    fn find_all(&self, collection: &str) -> Result<Vec<Document>, ComputeError>;

    /// Names of the available collections, sorted
    fn list_collections(&self) -> Result<Vec<String>, ComputeError>;
}

/// Apply the key-and-window query to a document scan.
///
/// Documents without a usable `_id`, or without `createdAt`, can never
/// match and are skipped. A document for `key` whose `createdAt` is present
/// but unreadable is malformed input, not an absent record, and fails the
/// query with `ComputeError::Schema`.
pub(crate) fn query_documents<I>(
    documents: I,
    key: &UserKey,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<RawRecord>, ComputeError>
where
    I: IntoIterator<Item = Document>,
{
    let mut skipped = 0usize;
    let mut records = Vec::new();

    for doc in documents {
        let matches_key = doc
            .get("_id")
            .and_then(document::key_of)
            .is_some_and(|id| id == key.as_str());
        if !matches_key {
            continue;
        }

        match doc.get("createdAt") {
            None | Some(Value::Null) => {
                skipped += 1;
                continue;
            }
            Some(value) if document::timestamp_of(value).is_none() => {
                return Err(ComputeError::Schema(format!(
                    "record for {} has unreadable createdAt {}",
                    key, value
                )));
            }
            Some(_) => {}
        }

        if let Some(record) = RawRecord::from_document(doc) {
            if start <= record.created_at && record.created_at < end {
                records.push(record);
            }
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, "documents without a createdAt");
    }

    records.sort_by_key(|r| r.created_at);
    Ok(records)
}
