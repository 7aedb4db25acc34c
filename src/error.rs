//! Error types for Mindscore

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can terminate a scoring request
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Storage unavailable: {0}")]
    Connection(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unrecognized duration: {0}")]
    Parse(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ComputeError {
    /// The outcome class reported to callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            ComputeError::Connection(_) => ErrorKind::Connection,
            ComputeError::Schema(_) => ErrorKind::Schema,
            ComputeError::Parse(_) => ErrorKind::Parse,
            ComputeError::Inference(_) | ComputeError::ModelLoad(_) => ErrorKind::Inference,
            ComputeError::InvalidRequest(_) | ComputeError::Config(_) => ErrorKind::InvalidRequest,
        }
    }
}

/// Outcome classes a caller can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    NoData,
    Schema,
    Parse,
    Inference,
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::NoData => "no_data",
            ErrorKind::Schema => "schema",
            ErrorKind::Parse => "parse",
            ErrorKind::Inference => "inference",
            ErrorKind::InvalidRequest => "invalid_request",
        }
    }

    /// Only storage outages are worth retrying; every other kind is
    /// deterministic for the same input.
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorKind::Connection)
    }
}
