//! Model handle
//!
//! The classifier is an external artifact. The pipeline only needs the
//! `Model` trait: a batch of feature vectors in, one score per vector out.
//! `EnsembleModel` is the shipped implementation, a soft-voting ensemble of
//! linear estimators exported to JSON.
//!
//! A model is loaded once at startup and never mutated afterwards, so a single
//! `Arc<dyn Model>` can serve concurrent requests.

use crate::error::ComputeError;
use crate::types::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Trait for score predictors
pub trait Model: Send + Sync {
    /// One prediction per input vector, positionally aligned
    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ComputeError>;
}

impl<F> Model for F
where
    F: Fn(&[FeatureVector]) -> Result<Vec<f64>, ComputeError> + Send + Sync,
{
    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ComputeError> {
        self(batch)
    }
}

/// Serialized model artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub version: String,
    /// Must equal `FEATURE_NAMES`, in order
    pub feature_names: Vec<String>,
    /// Standardization applied before the estimators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<ScalerParams>,
    pub estimators: Vec<LinearEstimatorParams>,
    /// Class labels; when present the averaged output snaps to the nearest one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearEstimatorParams {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

#[derive(Debug, Clone)]
struct Scaler {
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

#[derive(Debug, Clone)]
struct LinearEstimator {
    coefficients: [f64; FEATURE_COUNT],
    intercept: f64,
}

/// Soft-voting ensemble of linear estimators
#[derive(Debug, Clone)]
pub struct EnsembleModel {
    name: String,
    version: String,
    scaler: Option<Scaler>,
    estimators: Vec<LinearEstimator>,
    /// Sorted ascending
    classes: Vec<f64>,
}

impl EnsembleModel {
    /// Load an artifact from disk
    pub fn load(path: &Path) -> Result<Self, ComputeError> {
        let json = fs::read_to_string(path).map_err(|e| {
            ComputeError::ModelLoad(format!("cannot read {}: {}", path.display(), e))
        })?;
        let model = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            name = %model.name,
            version = %model.version,
            estimators = model.estimators.len(),
            "model loaded"
        );
        Ok(model)
    }

    /// Parse and validate an artifact
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let artifact: ModelArtifact = serde_json::from_str(json)
            .map_err(|e| ComputeError::ModelLoad(format!("invalid artifact: {}", e)))?;
        Self::from_artifact(artifact)
    }

    /// Validate an artifact against the feature contract
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ComputeError> {
        if artifact.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return Err(ComputeError::ModelLoad(format!(
                "feature_names must be {:?}, got {:?}",
                FEATURE_NAMES, artifact.feature_names
            )));
        }

        if artifact.estimators.is_empty() {
            return Err(ComputeError::ModelLoad("artifact has no estimators".to_string()));
        }

        let scaler = artifact
            .scaler
            .map(|s| {
                let mean = fixed(&s.mean, "scaler.mean")?;
                let scale = fixed(&s.scale, "scaler.scale")?;
                if scale.iter().any(|v| *v == 0.0) {
                    return Err(ComputeError::ModelLoad(
                        "scaler.scale must not contain zero".to_string(),
                    ));
                }
                Ok(Scaler { mean, scale })
            })
            .transpose()?;

        let estimators = artifact
            .estimators
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let what = format!("estimators[{}].coefficients", i);
                let coefficients = fixed(&e.coefficients, &what)?;
                if !e.intercept.is_finite() {
                    return Err(ComputeError::ModelLoad(format!(
                        "estimators[{}].intercept is not finite",
                        i
                    )));
                }
                Ok(LinearEstimator {
                    coefficients,
                    intercept: e.intercept,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut classes = artifact.classes;
        if classes.iter().any(|c| !c.is_finite()) {
            return Err(ComputeError::ModelLoad("classes must be finite".to_string()));
        }
        classes.sort_by(f64::total_cmp);

        Ok(Self {
            name: artifact.name,
            version: artifact.version,
            scaler,
            estimators,
            classes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Averaged estimator output, snapped to a class when classes are set.
    ///
    /// `None` when the average is not finite; such a value is never snapped.
    fn score(&self, features: &FeatureVector) -> Option<f64> {
        let mut x = features.to_array();
        if let Some(scaler) = &self.scaler {
            for i in 0..FEATURE_COUNT {
                x[i] = (x[i] - scaler.mean[i]) / scaler.scale[i];
            }
        }

        let total: f64 = self
            .estimators
            .iter()
            .map(|e| {
                e.intercept
                    + e.coefficients
                        .iter()
                        .zip(x.iter())
                        .map(|(c, v)| c * v)
                        .sum::<f64>()
            })
            .sum();
        let average = total / self.estimators.len() as f64;
        if !average.is_finite() {
            return None;
        }

        Some(self.nearest_class(average).unwrap_or(average))
    }

    /// Nearest class label; ties go to the lower label
    fn nearest_class(&self, value: f64) -> Option<f64> {
        let mut best: Option<f64> = None;
        for class in &self.classes {
            match best {
                Some(b) if (class - value).abs() >= (b - value).abs() => {}
                _ => best = Some(*class),
            }
        }
        best
    }
}

fn fixed(values: &[f64], what: &str) -> Result<[f64; FEATURE_COUNT], ComputeError> {
    let array: [f64; FEATURE_COUNT] = values.try_into().map_err(|_| {
        ComputeError::ModelLoad(format!(
            "{} must have {} values, got {}",
            what,
            FEATURE_COUNT,
            values.len()
        ))
    })?;
    if array.iter().any(|v| !v.is_finite()) {
        return Err(ComputeError::ModelLoad(format!("{} must be finite", what)));
    }
    Ok(array)
}

impl Model for EnsembleModel {
    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ComputeError> {
        batch
            .iter()
            .enumerate()
            .map(|(i, features)| {
                self.score(features).ok_or_else(|| {
                    ComputeError::Inference(format!("non-finite prediction for row {}", i))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_vector() -> FeatureVector {
        FeatureVector {
            heart_rate_bpm: 72.0,
            sleep_duration_hours: 6.5,
            physical_activity_steps: 5000.0,
            oxygen_saturation: 97.0,
            body_temperature_celsius: 36.6,
        }
    }

    fn artifact_json(classes: serde_json::Value) -> String {
        json!({
            "name": "mental_health_predictor_ensemble",
            "version": "1",
            "feature_names": FEATURE_NAMES,
            "estimators": [
                {"coefficients": [0.01, 0.1, 0.0001, 0.0, 0.0], "intercept": 0.0},
                {"coefficients": [0.0, 0.3, 0.0, 0.0, 0.0], "intercept": 1.0}
            ],
            "classes": classes
        })
        .to_string()
    }

    #[test]
    fn test_soft_vote_average() {
        let model = EnsembleModel::from_json(&artifact_json(json!([]))).unwrap();
        let out = model.predict(&[sample_vector()]).unwrap();
        // (0.72 + 0.65 + 0.5) and (1.0 + 1.95), averaged
        let expected = ((0.72 + 0.65 + 0.5) + (1.0 + 1.95)) / 2.0;
        assert!((out[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_classes_snap_to_nearest() {
        let model = EnsembleModel::from_json(&artifact_json(json!([3.0, 1.0, 2.0]))).unwrap();
        let out = model.predict(&[sample_vector()]).unwrap();
        assert_eq!(out, vec![2.0]);
    }

    #[test]
    fn test_class_tie_goes_low() {
        let model = EnsembleModel::from_json(&artifact_json(json!([0.0, 1.0]))).unwrap();
        assert_eq!(model.nearest_class(0.5), Some(0.0));
    }

    #[test]
    fn test_non_finite_input_is_not_snapped_to_a_class() {
        let model = EnsembleModel::from_json(&artifact_json(json!([0.0, 1.0, 2.0]))).unwrap();
        let mut garbage = sample_vector();
        garbage.heart_rate_bpm = f64::NAN;

        let err = model.predict(&[garbage]).unwrap_err();
        assert!(matches!(err, ComputeError::Inference(_)));

        garbage.heart_rate_bpm = f64::INFINITY;
        assert!(model.predict(&[garbage]).is_err());
    }

    #[test]
    fn test_scaler_applied() {
        let artifact = json!({
            "name": "scaled",
            "version": "1",
            "feature_names": FEATURE_NAMES,
            "scaler": {"mean": [70.0, 7.0, 5000.0, 97.0, 36.6], "scale": [2.0, 0.5, 1000.0, 1.0, 1.0]},
            "estimators": [{"coefficients": [1.0, 1.0, 1.0, 1.0, 1.0], "intercept": 0.0}]
        });
        let model = EnsembleModel::from_json(&artifact.to_string()).unwrap();
        let out = model.predict(&[sample_vector()]).unwrap();
        // 1.0 + -1.0 + 0 + 0 + 0
        assert!(out[0].abs() < 1e-9);
    }

    #[test]
    fn test_batch_alignment() {
        let model = EnsembleModel::from_json(&artifact_json(json!([]))).unwrap();
        let mut other = sample_vector();
        other.sleep_duration_hours = 8.0;
        let out = model.predict(&[sample_vector(), other]).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[1] > out[0]);
    }

    #[test]
    fn test_rejects_reordered_features() {
        let mut names = FEATURE_NAMES.to_vec();
        names.swap(0, 1);
        let artifact = json!({
            "name": "bad",
            "version": "1",
            "feature_names": names,
            "estimators": [{"coefficients": [0.0, 0.0, 0.0, 0.0, 0.0], "intercept": 0.0}]
        });
        let err = EnsembleModel::from_json(&artifact.to_string()).unwrap_err();
        assert!(matches!(err, ComputeError::ModelLoad(_)));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        for artifact in [
            json!({"name": "x", "version": "1", "feature_names": FEATURE_NAMES, "estimators": []}),
            json!({"name": "x", "version": "1", "feature_names": FEATURE_NAMES,
                   "estimators": [{"coefficients": [1.0, 2.0], "intercept": 0.0}]}),
            json!({"name": "x", "version": "1", "feature_names": FEATURE_NAMES,
                   "scaler": {"mean": [0.0, 0.0, 0.0, 0.0, 0.0], "scale": [1.0, 0.0, 1.0, 1.0, 1.0]},
                   "estimators": [{"coefficients": [1.0, 1.0, 1.0, 1.0, 1.0], "intercept": 0.0}]}),
        ] {
            assert!(EnsembleModel::from_json(&artifact.to_string()).is_err());
        }
    }

    #[test]
    fn test_closure_models() {
        let model = |batch: &[FeatureVector]| -> Result<Vec<f64>, ComputeError> {
            Ok(batch.iter().map(|f| f.heart_rate_bpm).collect())
        };
        assert_eq!(Model::predict(&model, &[sample_vector()]).unwrap(), vec![72.0]);
    }
}
