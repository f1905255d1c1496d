//! Model and scaler contracts
//!
//! Trained classifiers are opaque: the pipeline only needs their feature
//! order, label predictions and per-class probabilities. Scalers map the
//! continuous columns to the scale the models were trained on.

use crate::error::{ModelError, PipelineError};
use crate::types::FeatureMatrix;
use serde::{Deserialize, Serialize};

/// A trained binary classifier
pub trait Classifier: Send + Sync {
    /// Short model name, e.g. `lgbm`
    fn name(&self) -> &str;

    /// Feature names in the order the model expects
    fn feature_names(&self) -> &[String];

    /// Predicted label per row
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<i64>, ModelError>;

    /// Per-class probabilities per row
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError>;
}

/// Column-wise transform of the continuous features
pub trait Scaler: Send + Sync {
    /// Transform a matrix, returning the same columns in the same order
    fn transform(&self, features: &FeatureMatrix) -> Result<FeatureMatrix, ModelError>;
}

/// Recovery probability per row: the complement of P(class 1)
pub fn recovery_probabilities(
    probabilities: &[Vec<f64>],
    expected_rows: usize,
) -> Result<Vec<f64>, ModelError> {
    if probabilities.len() != expected_rows {
        return Err(ModelError::RowMismatch {
            expected: expected_rows,
            actual: probabilities.len(),
        });
    }
    probabilities
        .iter()
        .map(|row| match row.get(1) {
            Some(p) => Ok(1.0 - p),
            None => Err(ModelError::MissingPositiveClass(row.len())),
        })
        .collect()
}

/// Standardizing scaler: `(x - mean) / scale` per column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(columns: Vec<String>, mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ModelError> {
        let scaler = Self {
            columns,
            mean,
            scale,
        };
        scaler.check()?;
        Ok(scaler)
    }

    /// Load from JSON `{"columns": [...], "mean": [...], "scale": [...]}`
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let scaler: Self = serde_json::from_str(json)?;
        scaler.check()?;
        Ok(scaler)
    }

    fn check(&self) -> Result<(), ModelError> {
        for len in [self.mean.len(), self.scale.len()] {
            if len != self.columns.len() {
                return Err(ModelError::FeatureMismatch {
                    expected: self.columns.len(),
                    actual: len,
                });
            }
        }
        Ok(())
    }
}

impl Scaler for StandardScaler {
    fn transform(&self, features: &FeatureMatrix) -> Result<FeatureMatrix, ModelError> {
        let stats = features
            .columns
            .iter()
            .map(|name| {
                let idx = self
                    .columns
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| ModelError::UnknownColumn(name.clone()))?;
                // constant training columns were left unscaled
                let scale = if self.scale[idx] == 0.0 { 1.0 } else { self.scale[idx] };
                Ok((self.mean[idx], scale))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let rows = features
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&stats)
                    .map(|(v, (mean, scale))| (v - mean) / scale)
                    .collect()
            })
            .collect();

        Ok(FeatureMatrix {
            columns: features.columns.clone(),
            rows,
        })
    }
}
