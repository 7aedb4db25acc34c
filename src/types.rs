//! Core types for the Mindscore pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw stored records, mapped records, model feature vectors, and the
//! request outcome.

use crate::document::{self, Document};
use crate::error::{ComputeError, ErrorKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Feature names in the exact order the model was trained on
pub const FEATURE_NAMES: [&str; 5] = [
    "Heart_Rate_BPM",
    "Sleep_Duration_Hours",
    "Physical_Activity_Steps",
    "Oxygen_Saturation",
    "Body_Temperature_Celsius",
];

/// Number of features in the model contract
pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Opaque user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserKey(String);

impl UserKey {
    /// Accept any non-blank identifier, trimmed
    pub fn parse(raw: &str) -> Result<Self, ComputeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ComputeError::InvalidRequest(
                "user key must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a calendar date in `YYYY-MM-DD` form
pub fn parse_date(raw: &str) -> Result<NaiveDate, ComputeError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        ComputeError::InvalidRequest(format!("date {:?} is not YYYY-MM-DD: {}", raw, e))
    })
}

/// One stored biometric document
///
/// The key and timestamp are lifted out because selection depends on them;
/// everything else stays in `fields` untouched until feature mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    #[serde(rename = "_id")]
    pub key: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Document,
}

impl RawRecord {
    /// Lift a stored document into a record.
    ///
    /// Returns `None` when `_id` or `createdAt` is missing or unreadable; such
    /// a document can never match a key-and-window query.
    pub fn from_document(mut doc: Document) -> Option<Self> {
        let key = doc.get("_id").and_then(document::key_of)?;
        let created_at = doc.get("createdAt").and_then(document::timestamp_of)?;
        doc.remove("_id");
        doc.remove("createdAt");
        Some(Self {
            key,
            created_at,
            fields: doc,
        })
    }
}

/// A record after renaming and projection, before duration parsing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedRecord {
    #[serde(rename = "Heart_Rate_BPM")]
    pub heart_rate_bpm: f64,
    #[serde(rename = "Sleep_Duration_Hours")]
    pub sleep_duration: String,
    #[serde(rename = "Physical_Activity_Steps")]
    pub physical_activity_steps: u64,
    #[serde(rename = "Oxygen_Saturation")]
    pub oxygen_saturation: f64,
    #[serde(rename = "Body_Temperature_Celsius")]
    pub body_temperature_celsius: f64,
}

/// The five-feature model input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(rename = "Heart_Rate_BPM")]
    pub heart_rate_bpm: f64,
    #[serde(rename = "Sleep_Duration_Hours")]
    pub sleep_duration_hours: f64,
    #[serde(rename = "Physical_Activity_Steps")]
    pub physical_activity_steps: f64,
    #[serde(rename = "Oxygen_Saturation")]
    pub oxygen_saturation: f64,
    #[serde(rename = "Body_Temperature_Celsius")]
    pub body_temperature_celsius: f64,
}

impl FeatureVector {
    /// Values in `FEATURE_NAMES` order
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.heart_rate_bpm,
            self.sleep_duration_hours,
            self.physical_activity_steps,
            self.oxygen_saturation,
            self.body_temperature_celsius,
        ]
    }
}

/// A successful scoring request
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    /// Correlates log lines for this request
    pub request_id: Uuid,
    pub user_key: UserKey,
    pub date: NaiveDate,
    /// First model output
    pub score: f64,
    /// Records the score was derived from, ascending by `createdAt`
    pub records: Vec<RawRecord>,
    /// Feature vectors sent to the model, aligned with `records`
    pub features: Vec<FeatureVector>,
}

/// Outcome of a request that did not fail
#[derive(Debug, Clone)]
pub enum Prediction {
    Scored(PredictionResult),
    /// No records in the window for this user
    NoData,
}

impl Prediction {
    pub fn score(&self) -> Option<f64> {
        match self {
            Prediction::Scored(result) => Some(result.score),
            Prediction::NoData => None,
        }
    }
}

/// Caller-facing error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Caller-facing response: `{"score": ..}` or `{"error": {..}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalyzeResponse {
    Score { score: f64 },
    Error { error: AnalyzeError },
}

impl AnalyzeResponse {
    pub fn no_data(user_key: &UserKey, date: NaiveDate) -> Self {
        AnalyzeResponse::Error {
            error: AnalyzeError {
                kind: ErrorKind::NoData,
                message: format!("No data found for user {} on {}", user_key, date),
                retryable: false,
            },
        }
    }

    pub fn is_score(&self) -> bool {
        matches!(self, AnalyzeResponse::Score { .. })
    }
}

impl From<&ComputeError> for AnalyzeResponse {
    fn from(err: &ComputeError) -> Self {
        let kind = err.kind();
        AnalyzeResponse::Error {
            error: AnalyzeError {
                kind,
                message: err.to_string(),
                retryable: kind.retryable(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_user_key_rejects_blank() {
        assert!(UserKey::parse("   ").is_err());
        assert_eq!(UserKey::parse(" U1 ").unwrap().as_str(), "U1");
    }

    #[test]
    fn test_parse_date_is_strict() {
        assert_eq!(
            parse_date("2024-05-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
        assert!(parse_date("05/01/2024").is_err());
        assert!(parse_date("2024-02-30").is_err());
        assert!(matches!(
            parse_date("tomorrow"),
            Err(ComputeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_raw_record_from_extended_json() {
        let doc = json!({
            "_id": {"$oid": "680893c53f20e5bc586961ce"},
            "createdAt": {"$date": "2024-05-01T08:00:00Z"},
            "heartRateAvg": 72,
            "note": "extra"
        });
        let record = RawRecord::from_document(doc.as_object().unwrap().clone()).unwrap();
        assert_eq!(record.key, "680893c53f20e5bc586961ce");
        assert_eq!(record.fields.len(), 2);
        assert!(!record.fields.contains_key("_id"));
    }

    #[test]
    fn test_raw_record_requires_timestamp() {
        let doc = json!({"_id": "U1", "heartRateAvg": 72});
        assert!(RawRecord::from_document(doc.as_object().unwrap().clone()).is_none());
    }

    #[test]
    fn test_feature_vector_serializes_in_schema_order() {
        let vector = FeatureVector {
            heart_rate_bpm: 72.0,
            sleep_duration_hours: 6.5,
            physical_activity_steps: 5000.0,
            oxygen_saturation: 97.0,
            body_temperature_celsius: 36.6,
        };
        let json = serde_json::to_value(vector).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        let mut expected = FEATURE_NAMES.to_vec();
        // serde_json maps sort their keys; order is checked through to_array
        let mut sorted_keys = keys.clone();
        sorted_keys.sort();
        expected.sort();
        assert_eq!(sorted_keys, expected);
        assert_eq!(vector.to_array(), [72.0, 6.5, 5000.0, 97.0, 36.6]);
    }

    #[test]
    fn test_analyze_response_shapes() {
        let ok = AnalyzeResponse::Score { score: 2.0 };
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"score": 2.0}));

        let err = AnalyzeResponse::from(&ComputeError::Connection("refused".into()));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"error": {
                "kind": "connection",
                "message": "Storage unavailable: refused",
                "retryable": true
            }})
        );

        let back: AnalyzeResponse =
            serde_json::from_value(json!({"score": 1.5})).unwrap();
        assert!(back.is_score());
    }
}
