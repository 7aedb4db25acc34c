//! Stored document accessors
//!
//! Records arrive either as plain JSON or as MongoDB Extended JSON exports.
//! These helpers read the handful of value shapes the pipeline cares about
//! without committing to either encoding.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// A stored document: an open mapping of field name to JSON value
pub type Document = Map<String, Value>;

/// Read an identifier: `"abc"` or `{"$oid": "abc"}`
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("$oid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Zone-less layouts, read as UTC the way the database driver does
const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Read a timestamp: RFC 3339 text, zone-less text (UTC), epoch millis, or
/// `{"$date": ...}`
pub fn timestamp_of(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_text(s),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(obj) => match obj.get("$date") {
            Some(Value::Object(inner)) => inner
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            Some(inner) => timestamp_of(inner),
            None => None,
        },
        _ => None,
    }
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Read a finite float: a JSON number or
/// `{"$numberDouble"|"$numberInt"|"$numberLong": "..."}`.
///
/// `{"$numberDouble": "NaN"}` and the infinities are not numbers here.
pub fn number_of(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(obj) => ["$numberDouble", "$numberInt", "$numberLong", "$numberDecimal"]
            .iter()
            .find_map(|tag| obj.get(*tag))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<f64>().ok()),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Read a non-negative integer. Floats are accepted only when integral.
pub fn count_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::Object(obj) => ["$numberInt", "$numberLong"]
            .iter()
            .find_map(|tag| obj.get(*tag))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_shapes() {
        assert_eq!(key_of(&json!("U1")), Some("U1".to_string()));
        assert_eq!(
            key_of(&json!({"$oid": "680893c53f20e5bc586961ce"})),
            Some("680893c53f20e5bc586961ce".to_string())
        );
        assert_eq!(key_of(&json!(42)), None);
    }

    #[test]
    fn test_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert_eq!(timestamp_of(&json!("2024-05-01T08:00:00Z")), Some(expected));
        assert_eq!(
            timestamp_of(&json!("2024-05-01T10:00:00+02:00")),
            Some(expected)
        );
        let millis = expected.timestamp_millis();
        assert_eq!(timestamp_of(&json!(millis)), Some(expected));
        assert_eq!(
            timestamp_of(&json!({"$date": "2024-05-01T08:00:00.000Z"})),
            Some(expected)
        );
        assert_eq!(
            timestamp_of(&json!({"$date": {"$numberLong": millis.to_string()}})),
            Some(expected)
        );
        assert_eq!(timestamp_of(&json!("yesterday")), None);
    }

    #[test]
    fn test_zone_less_timestamps_are_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        for text in [
            "2024-05-01T08:00",
            "2024-05-01T08:00:00",
            "2024-05-01T08:00:00.000",
            "2024-05-01 08:00",
            "2024-05-01 08:00:00",
        ] {
            assert_eq!(timestamp_of(&json!(text)), Some(expected), "{text}");
        }
        assert_eq!(timestamp_of(&json!({"$date": "2024-05-01T08:00"})), Some(expected));
        assert_eq!(timestamp_of(&json!("2024-05-01")), None);
    }

    #[test]
    fn test_number_shapes() {
        assert_eq!(number_of(&json!(36.6)), Some(36.6));
        assert_eq!(number_of(&json!(72)), Some(72.0));
        assert_eq!(number_of(&json!({"$numberDouble": "97.5"})), Some(97.5));
        assert_eq!(number_of(&json!("97")), None);
    }

    #[test]
    fn test_number_rejects_non_finite() {
        assert_eq!(number_of(&json!({"$numberDouble": "NaN"})), None);
        assert_eq!(number_of(&json!({"$numberDouble": "Infinity"})), None);
        assert_eq!(number_of(&json!({"$numberDouble": "-Infinity"})), None);
        assert_eq!(number_of(&json!({"$numberDecimal": "inf"})), None);
    }

    #[test]
    fn test_count_rejects_fractions_and_negatives() {
        assert_eq!(count_of(&json!(5000)), Some(5000));
        assert_eq!(count_of(&json!(5000.0)), Some(5000));
        assert_eq!(count_of(&json!({"$numberInt": "5000"})), Some(5000));
        assert_eq!(count_of(&json!(12.5)), None);
        assert_eq!(count_of(&json!(-3)), None);
    }
}
