//! Mindscore - daily biometric records to a mental-health score
//!
//! Mindscore turns one user's stored wearable records for a calendar day into
//! a model score through a deterministic pipeline: record selection → feature
//! mapping → duration parsing → model invocation.
//!
//! ## Modules
//!
//! - **Pipeline**: `PredictionPipeline` runs a request end to end
//! - **Storage**: `RecordStore` backends (in-memory, exported collection files)
//! - **Model**: the `Model` seam and the JSON-artifact `EnsembleModel`

pub mod config;
pub mod document;
pub mod duration;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod selector;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::Config;
pub use duration::DurationParser;
pub use error::{ComputeError, ErrorKind};
pub use features::FeatureMapper;
pub use model::{EnsembleModel, Model};
pub use pipeline::PredictionPipeline;
pub use selector::{RecordSelector, TimeWindow};
pub use store::{FileStore, MemoryStore, RecordStore};
pub use types::{
    AnalyzeResponse, FeatureVector, Prediction, PredictionResult, RawRecord, UserKey,
    FEATURE_NAMES,
};

/// Mindscore library version
pub const MINDSCORE_VERSION: &str = env!("CARGO_PKG_VERSION");
