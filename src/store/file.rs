//! Directory-backed record store
//!
//! Each collection is one exported file in the store directory:
//! `<name>.json` holding a JSON array of documents, or `<name>.ndjson`
//! holding one document per line. Plain JSON and Extended JSON exports are
//! both readable.

use super::{query_documents, RecordStore, DEFAULT_RECORD_COLLECTION};
use crate::document::Document;
use crate::error::ComputeError;
use crate::types::{RawRecord, UserKey};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Store reading collection files from a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    record_collection: String,
}

impl FileStore {
    /// Open a store rooted at `dir`, reading records from the default collection
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::with_collection(dir, DEFAULT_RECORD_COLLECTION)
    }

    /// Open a store reading records from `record_collection`
    pub fn with_collection(dir: impl Into<PathBuf>, record_collection: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            record_collection: record_collection.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_collection(&self) -> &str {
        &self.record_collection
    }

    fn collection_file(&self, collection: &str) -> Result<(PathBuf, Format), ComputeError> {
        if collection.is_empty()
            || collection.contains(['/', '\\'])
            || collection.starts_with('.')
        {
            return Err(ComputeError::InvalidRequest(format!(
                "invalid collection name {:?}",
                collection
            )));
        }

        if !self.dir.is_dir() {
            return Err(ComputeError::Connection(format!(
                "store directory {} does not exist",
                self.dir.display()
            )));
        }

        for format in [Format::Json, Format::Ndjson] {
            let path = self.dir.join(format!("{}.{}", collection, format.extension()));
            if path.is_file() {
                return Ok((path, format));
            }
        }

        Err(ComputeError::Connection(format!(
            "collection {} not found in {}",
            collection,
            self.dir.display()
        )))
    }
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Json,
    Ndjson,
}

impl Format {
    fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Ndjson => "ndjson",
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Format::Json),
            "ndjson" => Some(Format::Ndjson),
            _ => None,
        }
    }
}

/// Parse a JSON array of documents
fn parse_array(content: &str, collection: &str) -> Result<Vec<Document>, ComputeError> {
    let values: Vec<Value> = serde_json::from_str(content).map_err(|e| {
        ComputeError::Connection(format!("collection {} is corrupt: {}", collection, e))
    })?;
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| into_document(value, collection, index + 1))
        .collect()
}

/// Parse newline-delimited documents, skipping blank lines
fn parse_ndjson(content: &str, collection: &str) -> Result<Vec<Document>, ComputeError> {
    let mut documents = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(trimmed).map_err(|e| {
            ComputeError::Connection(format!(
                "collection {} is corrupt at line {}: {}",
                collection,
                line_num + 1,
                e
            ))
        })?;
        documents.push(into_document(value, collection, line_num + 1)?);
    }
    Ok(documents)
}

fn into_document(
    value: Value,
    collection: &str,
    position: usize,
) -> Result<Document, ComputeError> {
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(ComputeError::Connection(format!(
            "collection {} entry {} is not a document: {}",
            collection, position, other
        ))),
    }
}

impl RecordStore for FileStore {
    fn find_by_key_and_window(
        &self,
        key: &UserKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, ComputeError> {
        let documents = self.find_all(&self.record_collection)?;
        query_documents(documents, key, start, end)
    }

    fn find_all(&self, collection: &str) -> Result<Vec<Document>, ComputeError> {
        let (path, format) = self.collection_file(collection)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            ComputeError::Connection(format!("cannot read {}: {}", path.display(), e))
        })?;

        let documents = match format {
            Format::Json => parse_array(&content, collection)?,
            Format::Ndjson => parse_ndjson(&content, collection)?,
        };
        tracing::debug!(collection, count = documents.len(), "loaded collection");
        Ok(documents)
    }

    fn list_collections(&self) -> Result<Vec<String>, ComputeError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            ComputeError::Connection(format!("cannot list {}: {}", self.dir.display(), e))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| ComputeError::Connection(e.to_string()))?
                .path();
            if !path.is_file() || Format::from_path(&path).is_none() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}
