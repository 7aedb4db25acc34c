//! Feature mapping
//!
//! This module projects stored records onto the model's feature schema:
//! - Source fields renamed to model feature names
//! - Every other field dropped
//! - Sleep duration text resolved to fractional hours

use crate::document::{self, Document};
use crate::duration::DurationParser;
use crate::error::ComputeError;
use crate::types::{FeatureVector, MappedRecord, RawRecord};
use serde_json::Value;

/// Source field → model feature name
pub const COLUMN_MAPPING: [(&str, &str); 5] = [
    ("heartRateAvg", "Heart_Rate_BPM"),
    ("oxygenAvg", "Oxygen_Saturation"),
    ("temperature", "Body_Temperature_Celsius"),
    ("totalSteps", "Physical_Activity_Steps"),
    ("sleepDuration", "Sleep_Duration_Hours"),
];

/// Feature mapper for projecting raw records
pub struct FeatureMapper;

impl FeatureMapper {
    /// Map every record, failing on the first one that breaks the schema
    pub fn map(records: &[RawRecord]) -> Result<Vec<MappedRecord>, ComputeError> {
        if records.is_empty() {
            return Err(ComputeError::Schema("no records to map".to_string()));
        }

        records
            .iter()
            .enumerate()
            .map(|(index, record)| Self::map_record(index, record))
            .collect()
    }

    /// Map a single record
    pub fn map_record(index: usize, record: &RawRecord) -> Result<MappedRecord, ComputeError> {
        let fields = &record.fields;

        let dropped = fields
            .keys()
            .filter(|name| !COLUMN_MAPPING.iter().any(|(source, _)| *source == name.as_str()))
            .count();
        if dropped > 0 {
            tracing::trace!(index, dropped, "dropping fields outside the feature schema");
        }

        Ok(MappedRecord {
            heart_rate_bpm: number_field(fields, index, "heartRateAvg")?,
            sleep_duration: text_field(fields, index, "sleepDuration")?,
            physical_activity_steps: count_field(fields, index, "totalSteps")?,
            oxygen_saturation: number_field(fields, index, "oxygenAvg")?,
            body_temperature_celsius: number_field(fields, index, "temperature")?,
        })
    }

    /// Replace each duration string with hours, producing model input
    pub fn resolve_durations(mapped: &[MappedRecord]) -> Result<Vec<FeatureVector>, ComputeError> {
        mapped
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let hours = DurationParser::parse_hours(&record.sleep_duration).map_err(|e| {
                    ComputeError::Parse(format!("record {}: {}", index, strip_kind(&e)))
                })?;
                Ok(FeatureVector {
                    heart_rate_bpm: record.heart_rate_bpm,
                    sleep_duration_hours: hours,
                    physical_activity_steps: record.physical_activity_steps as f64,
                    oxygen_saturation: record.oxygen_saturation,
                    body_temperature_celsius: record.body_temperature_celsius,
                })
            })
            .collect()
    }
}

/// Look up a field, treating explicit null as absent
fn present<'a>(
    fields: &'a Document,
    index: usize,
    name: &str,
) -> Result<&'a Value, ComputeError> {
    match fields.get(name) {
        Some(Value::Null) | None => Err(ComputeError::Schema(format!(
            "record {} is missing required field {}",
            index, name
        ))),
        Some(value) => Ok(value),
    }
}

fn number_field(fields: &Document, index: usize, name: &str) -> Result<f64, ComputeError> {
    let value = present(fields, index, name)?;
    document::number_of(value).ok_or_else(|| wrong_type(index, name, "a number", value))
}

fn count_field(fields: &Document, index: usize, name: &str) -> Result<u64, ComputeError> {
    let value = present(fields, index, name)?;
    document::count_of(value)
        .ok_or_else(|| wrong_type(index, name, "a non-negative integer", value))
}

fn text_field(fields: &Document, index: usize, name: &str) -> Result<String, ComputeError> {
    let value = present(fields, index, name)?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type(index, name, "a string", value))
}

fn wrong_type(index: usize, name: &str, expected: &str, value: &Value) -> ComputeError {
    ComputeError::Schema(format!(
        "record {} field {} must be {}, got {}",
        index, name, expected, value
    ))
}

fn strip_kind(err: &ComputeError) -> String {
    match err {
        ComputeError::Parse(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn make_test_record(fields: Value) -> RawRecord {
        RawRecord {
            key: "U1".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    fn full_fields() -> Value {
        json!({
            "heartRateAvg": 72,
            "oxygenAvg": 97,
            "temperature": 36.6,
            "totalSteps": 5000,
            "sleepDuration": "6 hr 30 min",
            "stressLevel": "low",
            "deviceId": "band-7"
        })
    }

    #[test]
    fn test_rename_and_drop_extras() {
        let mapped = FeatureMapper::map(&[make_test_record(full_fields())]).unwrap();
        assert_eq!(
            mapped,
            vec![MappedRecord {
                heart_rate_bpm: 72.0,
                sleep_duration: "6 hr 30 min".to_string(),
                physical_activity_steps: 5000,
                oxygen_saturation: 97.0,
                body_temperature_celsius: 36.6,
            }]
        );
    }

    #[test]
    fn test_mapping_is_idempotent_and_order_preserving() {
        let mut second = full_fields();
        second["heartRateAvg"] = json!(80);
        let records = vec![make_test_record(full_fields()), make_test_record(second)];

        let first_pass = FeatureMapper::map(&records).unwrap();
        let second_pass = FeatureMapper::map(&records).unwrap();
        assert_eq!(first_pass, second_pass);
        assert_eq!(first_pass[0].heart_rate_bpm, 72.0);
        assert_eq!(first_pass[1].heart_rate_bpm, 80.0);
    }

    #[test]
    fn test_missing_oxygen_is_schema_error() {
        let mut fields = full_fields();
        fields.as_object_mut().unwrap().remove("oxygenAvg");

        let err = FeatureMapper::map(&[make_test_record(fields)]).unwrap_err();
        match err {
            ComputeError::Schema(msg) => assert!(msg.contains("oxygenAvg"), "{msg}"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_every_source_field_is_required() {
        for (source, _) in COLUMN_MAPPING {
            let mut fields = full_fields();
            fields.as_object_mut().unwrap().remove(source);
            let result = FeatureMapper::map(&[make_test_record(fields)]);
            assert!(
                matches!(result, Err(ComputeError::Schema(_))),
                "removing {source} should fail"
            );
        }
    }

    #[test]
    fn test_null_counts_as_missing() {
        let mut fields = full_fields();
        fields["temperature"] = Value::Null;
        let result = FeatureMapper::map(&[make_test_record(fields)]);
        assert!(matches!(result, Err(ComputeError::Schema(_))));
    }

    #[test]
    fn test_wrong_types_are_schema_errors() {
        for (field, bad) in [
            ("totalSteps", json!("many")),
            ("totalSteps", json!(12.5)),
            ("sleepDuration", json!(7)),
            ("heartRateAvg", json!("72")),
        ] {
            let mut fields = full_fields();
            fields[field] = bad;
            let result = FeatureMapper::map(&[make_test_record(fields)]);
            assert!(
                matches!(result, Err(ComputeError::Schema(_))),
                "{field} should be rejected"
            );
        }
    }

    #[test]
    fn test_empty_input_is_schema_error() {
        assert!(matches!(
            FeatureMapper::map(&[]),
            Err(ComputeError::Schema(_))
        ));
    }

    #[test]
    fn test_resolve_durations() {
        let mapped = FeatureMapper::map(&[make_test_record(full_fields())]).unwrap();
        let features = FeatureMapper::resolve_durations(&mapped).unwrap();
        assert_eq!(features[0].to_array(), [72.0, 6.5, 5000.0, 97.0, 36.6]);
    }

    #[test]
    fn test_unparsable_duration_is_parse_error() {
        let mut fields = full_fields();
        fields["sleepDuration"] = json!("a good night");
        let mapped = FeatureMapper::map(&[make_test_record(fields)]).unwrap();
        let err = FeatureMapper::resolve_durations(&mapped).unwrap_err();
        match err {
            ComputeError::Parse(msg) => assert!(msg.starts_with("record 0"), "{msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
