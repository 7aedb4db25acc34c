//! Process configuration
//!
//! Read from environment variables; the CLI overrides individual values with
//! flags.

use crate::error::ComputeError;
use crate::selector::parse_utc_offset;
use crate::store::DEFAULT_RECORD_COLLECTION;
use chrono::{FixedOffset, Offset, Utc};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_MODEL_PATH: &str = "MINDSCORE_MODEL_PATH";
pub const ENV_STORE_DIR: &str = "MINDSCORE_STORE_DIR";
pub const ENV_COLLECTION: &str = "MINDSCORE_COLLECTION";
pub const ENV_UTC_OFFSET: &str = "MINDSCORE_UTC_OFFSET";
pub const ENV_FETCH_TIMEOUT_MS: &str = "MINDSCORE_FETCH_TIMEOUT_MS";

/// Default store directory
pub const DEFAULT_STORE_DIR: &str = "data";

/// Default bound on the record fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone)]
pub struct Config {
    /// Model artifact; required for scoring, not for browsing
    pub model_path: Option<PathBuf>,
    pub store_dir: PathBuf,
    pub collection: String,
    /// Offset the stored timestamps' calendar days are measured in
    pub utc_offset: FixedOffset,
    /// `None` waits for the store indefinitely
    pub fetch_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: None,
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            collection: DEFAULT_RECORD_COLLECTION.to_string(),
            utc_offset: Utc.fix(),
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ComputeError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Read configuration through `get` so tests never touch the process
    /// environment.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, ComputeError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = get(ENV_MODEL_PATH).filter(|v| !v.trim().is_empty()) {
            config.model_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = get(ENV_STORE_DIR).filter(|v| !v.trim().is_empty()) {
            config.store_dir = PathBuf::from(dir);
        }
        if let Some(collection) = get(ENV_COLLECTION).filter(|v| !v.trim().is_empty()) {
            config.collection = collection.trim().to_string();
        }
        if let Some(offset) = get(ENV_UTC_OFFSET) {
            config.utc_offset = parse_utc_offset(&offset)
                .map_err(|e| ComputeError::Config(format!("{}: {}", ENV_UTC_OFFSET, e)))?;
        }
        if let Some(ms) = get(ENV_FETCH_TIMEOUT_MS) {
            config.fetch_timeout = parse_timeout_ms(&ms)
                .map_err(|e| ComputeError::Config(format!("{}: {}", ENV_FETCH_TIMEOUT_MS, e)))?;
        }

        Ok(config)
    }
}

/// Milliseconds as a timeout; `0` disables it
pub fn parse_timeout_ms(raw: &str) -> Result<Option<Duration>, String> {
    let ms: u64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{:?} is not a whole number of milliseconds", raw))?;
    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}
