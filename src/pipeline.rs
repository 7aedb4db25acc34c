//! Pipeline orchestration
//!
//! This module provides the public API for Mindscore.
//! It runs one scoring request from a user key and a date to a score.

use crate::config::{Config, DEFAULT_FETCH_TIMEOUT};
use crate::error::ComputeError;
use crate::features::FeatureMapper;
use crate::model::{EnsembleModel, Model};
use crate::selector::RecordSelector;
use crate::store::{FileStore, RecordStore};
use crate::types::{parse_date, AnalyzeResponse, Prediction, PredictionResult, RawRecord, UserKey};
use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Request stages, in order. A request never returns to an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Selecting,
    Mapping,
    ParsingDurations,
    Invoking,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Selecting => "selecting",
            Stage::Mapping => "mapping",
            Stage::ParsingDurations => "parsing_durations",
            Stage::Invoking => "invoking",
        }
    }
}

struct StageFailure {
    stage: Stage,
    error: ComputeError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T, ComputeError> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

/// Default cap on fetch workers alive at once, including timed-out ones
pub const DEFAULT_MAX_FETCHES_IN_FLIGHT: usize = 32;

/// Decrements the in-flight count when a fetch worker exits
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scoring pipeline over a record store and a loaded model.
///
/// Holds no per-request state; share one instance across threads.
///
/// A timed-out fetch leaves its worker thread running until the store call
/// returns. At most `max_fetches_in_flight` workers exist at once; past that,
/// requests fail fast with a connection error instead of spawning more.
pub struct PredictionPipeline {
    store: Arc<dyn RecordStore>,
    model: Arc<dyn Model>,
    utc_offset: FixedOffset,
    fetch_timeout: Option<Duration>,
    max_fetches_in_flight: usize,
    fetches_in_flight: Arc<AtomicUsize>,
}

impl PredictionPipeline {
    /// Create a pipeline measuring days in UTC with the default fetch timeout
    pub fn new(store: Arc<dyn RecordStore>, model: Arc<dyn Model>) -> Self {
        Self {
            store,
            model,
            utc_offset: Utc.fix(),
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            max_fetches_in_flight: DEFAULT_MAX_FETCHES_IN_FLIGHT,
            fetches_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the file-store pipeline described by `config`, loading the model
    pub fn from_config(config: &Config) -> Result<Self, ComputeError> {
        let model_path = config.model_path.as_ref().ok_or_else(|| {
            ComputeError::ModelLoad("no model artifact path configured".to_string())
        })?;
        let model = EnsembleModel::load(model_path)?;
        let store = FileStore::with_collection(&config.store_dir, config.collection.clone());

        Ok(Self::new(Arc::new(store), Arc::new(model))
            .with_utc_offset(config.utc_offset)
            .with_fetch_timeout(config.fetch_timeout))
    }

    /// Offset in which calendar days start
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Bound on the record fetch; `None` waits indefinitely
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Cap on concurrent fetch workers; values below 1 are treated as 1
    pub fn with_max_fetches_in_flight(mut self, max: usize) -> Self {
        self.max_fetches_in_flight = max.max(1);
        self
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Score one user-day.
    ///
    /// Pipeline stages:
    /// 1. Selecting - fetch the user's records inside the day window
    /// 2. Mapping - project each record onto the feature schema
    /// 3. ParsingDurations - turn sleep text into hours
    /// 4. Invoking - run the model once over the batch, keep the first score
    ///
    /// An empty day is `Ok(Prediction::NoData)`. Any stage failure ends the
    /// request with that stage's error.
    pub fn predict(&self, user_key: &UserKey, date: NaiveDate) -> Result<Prediction, ComputeError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "predict",
            request_id = %request_id,
            user = %user_key,
            %date
        );
        let _guard = span.enter();

        match self.run(request_id, user_key, date) {
            Ok(prediction) => {
                match &prediction {
                    Prediction::Scored(result) => tracing::info!(
                        score = result.score,
                        records = result.records.len(),
                        "request succeeded"
                    ),
                    Prediction::NoData => tracing::info!("no records for this day"),
                }
                Ok(prediction)
            }
            Err(StageFailure { stage, error }) => {
                tracing::warn!(
                    stage = stage.as_str(),
                    kind = error.kind().as_str(),
                    %error,
                    "request failed"
                );
                Err(error)
            }
        }
    }

    /// Caller-facing entry point: raw strings in, `{score}` or `{error}` out
    pub fn analyze(&self, user_key: &str, date: &str) -> AnalyzeResponse {
        let parsed = UserKey::parse(user_key).and_then(|key| Ok((key, parse_date(date)?)));
        let (key, date) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => return AnalyzeResponse::from(&e),
        };

        match self.predict(&key, date) {
            Ok(Prediction::Scored(result)) => AnalyzeResponse::Score {
                score: result.score,
            },
            Ok(Prediction::NoData) => AnalyzeResponse::no_data(&key, date),
            Err(e) => AnalyzeResponse::from(&e),
        }
    }

    fn run(
        &self,
        request_id: Uuid,
        user_key: &UserKey,
        date: NaiveDate,
    ) -> Result<Prediction, StageFailure> {
        tracing::debug!(stage = Stage::Selecting.as_str());
        let selector =
            RecordSelector::new(user_key.clone(), date, self.utc_offset).at(Stage::Selecting)?;
        let fetched = self.fetch(&selector).at(Stage::Selecting)?;
        let records = selector.select(fetched);
        if records.is_empty() {
            return Ok(Prediction::NoData);
        }
        tracing::debug!(records = records.len(), "records selected");

        tracing::debug!(stage = Stage::Mapping.as_str());
        let mapped = FeatureMapper::map(&records).at(Stage::Mapping)?;

        tracing::debug!(stage = Stage::ParsingDurations.as_str());
        let features = FeatureMapper::resolve_durations(&mapped).at(Stage::ParsingDurations)?;

        tracing::debug!(stage = Stage::Invoking.as_str(), batch = features.len());
        let predictions = self
            .model
            .predict(&features)
            .map_err(into_inference)
            .at(Stage::Invoking)?;
        if predictions.len() != features.len() {
            return Err(StageFailure {
                stage: Stage::Invoking,
                error: ComputeError::Inference(format!(
                    "model returned {} predictions for {} rows",
                    predictions.len(),
                    features.len()
                )),
            });
        }
        let score = predictions
            .first()
            .copied()
            .filter(|s| s.is_finite())
            .ok_or_else(|| ComputeError::Inference("model returned a non-finite score".to_string()))
            .at(Stage::Invoking)?;

        Ok(Prediction::Scored(PredictionResult {
            request_id,
            user_key: user_key.clone(),
            date,
            score,
            records,
            features,
        }))
    }

    /// Query the store, bounded by the fetch timeout.
    ///
    /// The store call runs on a worker thread. On expiry the request fails
    /// and the worker's eventual result is discarded.
    fn fetch(&self, selector: &RecordSelector) -> Result<Vec<RawRecord>, ComputeError> {
        let window = selector.window();
        let Some(timeout) = self.fetch_timeout else {
            return self
                .store
                .find_by_key_and_window(selector.user_key(), window.start, window.end);
        };

        let max = self.max_fetches_in_flight;
        let reserved = self
            .fetches_in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(ComputeError::Connection(format!(
                "{} record fetches still pending; store is not answering",
                self.max_fetches_in_flight
            )));
        }
        let slot = InFlight(Arc::clone(&self.fetches_in_flight));

        let store = Arc::clone(&self.store);
        let key = selector.user_key().clone();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("mindscore-fetch".to_string())
            .spawn(move || {
                let _slot = slot;
                // The receiver is gone if the request already timed out
                let _ = tx.send(store.find_by_key_and_window(&key, window.start, window.end));
            })
            .map_err(|e| ComputeError::Connection(format!("cannot start record fetch: {}", e)))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ComputeError::Connection(format!(
                "record fetch timed out after {} ms",
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(ComputeError::Connection(
                "record fetch ended without a result".to_string(),
            )),
        }
    }
}

fn into_inference(error: ComputeError) -> ComputeError {
    match error {
        ComputeError::Inference(_) => error,
        other => ComputeError::Inference(other.to_string()),
    }
}
