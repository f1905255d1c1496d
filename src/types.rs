//! Core types for the SSNHL outcome pipeline
//!
//! This module defines the data structures that flow between stages: the lab
//! flag screen, the normalized batch, the finalized batch, the model input
//! matrix, and the prediction outcome.

use crate::schema::{ColumnSpec, FeatureFrame, FEATURE_SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lab flags computed from raw values, before imputation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabFlagScreen {
    /// Flag names, in rule order
    pub flags: Vec<String>,
    /// One 0/1 value per flag for each row
    pub rows: Vec<Vec<u8>>,
}

impl LabFlagScreen {
    /// Flag value of one row, `None` for an unknown flag or row
    pub fn value(&self, row: usize, flag: &str) -> Option<u8> {
        let idx = self.flags.iter().position(|f| f == flag)?;
        self.rows.get(row)?.get(idx).copied()
    }

    /// Names of the flags raised for a row
    pub fn raised(&self, row: usize) -> Vec<&str> {
        match self.rows.get(row) {
            Some(values) => self
                .flags
                .iter()
                .zip(values)
                .filter(|(_, v)| **v == 1)
                .map(|(f, _)| f.as_str())
                .collect(),
            None => Vec::new(),
        }
    }
}

/// A lab flag whose value differs between the raw screen and the final batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagChange {
    pub row: usize,
    pub identifier: Option<String>,
    pub flag: String,
    pub screened: u8,
    pub assigned: u8,
}

/// Output of the schema normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    /// Normalized frame, still carrying nulls
    pub frame: FeatureFrame,
    /// Identifiers of the surviving rows, row-aligned
    pub identifiers: Vec<String>,
    /// Lab flags screened from the raw values
    pub lab_screen: LabFlagScreen,
}

/// Fixed-schema numeric batch, ready for model reindexing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedBatch {
    pub schema_version: String,
    pub columns: Vec<ColumnSpec>,
    pub identifiers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    #[serde(default)]
    pub lab_screen: LabFlagScreen,
}

impl FinalizedBatch {
    pub fn new(columns: Vec<ColumnSpec>, identifiers: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION.to_string(),
            columns,
            identifiers,
            rows,
            lab_screen: LabFlagScreen::default(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.columns.iter().position(|c| c.name == column)?;
        self.rows.get(row)?.get(idx).copied()
    }

    /// Numeric matrix over the full schema
    pub fn to_matrix(&self) -> FeatureMatrix {
        FeatureMatrix {
            columns: self.columns.iter().map(|c| c.name.clone()).collect(),
            rows: self.rows.clone(),
        }
    }

    /// Flags whose final value differs from the raw screen
    pub fn flag_changes(&self) -> Vec<FlagChange> {
        let mut changes = Vec::new();
        for (row, screened) in self.lab_screen.rows.iter().enumerate() {
            for (flag, before) in self.lab_screen.flags.iter().zip(screened) {
                let after = match self.value(row, flag) {
                    Some(v) => u8::from(v == 1.0),
                    None => continue,
                };
                if after != *before {
                    changes.push(FlagChange {
                        row,
                        identifier: self.identifiers.get(row).cloned(),
                        flag: flag.clone(),
                        screened: *before,
                        assigned: after,
                    });
                }
            }
        }
        changes
    }
}

/// Named numeric table passed to scalers and models
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Reorder to `columns`, filling absent ones with 0
    pub fn reindex<S: AsRef<str>>(&self, columns: &[S]) -> FeatureMatrix {
        let sources: Vec<Option<usize>> = columns
            .iter()
            .map(|c| self.column_index(c.as_ref()))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                sources
                    .iter()
                    .map(|src| src.and_then(|i| row.get(i).copied()).unwrap_or(0.0))
                    .collect()
            })
            .collect();
        FeatureMatrix {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows,
        }
    }

    /// Overwrite the columns present in `part` with its values
    pub fn update(&mut self, part: &FeatureMatrix) {
        for (src, name) in part.columns.iter().enumerate() {
            if let Some(dst) = self.column_index(name) {
                for (row, values) in self.rows.iter_mut().zip(&part.rows) {
                    if let Some(v) = values.get(src) {
                        row[dst] = *v;
                    }
                }
            }
        }
    }
}

/// Output of one model over a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model: String,
    pub labels: Vec<i64>,
    /// Recovery probability per row, 1 - P(no recovery)
    pub recovery_probabilities: Vec<f64>,
    pub accuracy: f64,
    /// The model's input rows, in its own feature order
    pub features: FeatureMatrix,
}

/// Predictions of both models for a request, one entry per patient row
///
/// Every field is `None` when any stage failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub request_id: Uuid,
    pub hospital: String,
    pub computed_at: DateTime<Utc>,
    pub label_a: Option<Vec<i64>>,
    pub prob_a: Option<Vec<f64>>,
    pub label_b: Option<Vec<i64>>,
    pub prob_b: Option<Vec<f64>>,
    pub features_a: Option<FeatureMatrix>,
    pub features_b: Option<FeatureMatrix>,
    pub identifiers: Option<Vec<String>>,
    pub model_a: Option<String>,
    pub model_b: Option<String>,
    pub accuracy_a: Option<f64>,
    pub accuracy_b: Option<f64>,
}

impl PredictionOutcome {
    /// Outcome with every field empty
    pub fn empty(hospital: &str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            hospital: hospital.to_string(),
            computed_at: Utc::now(),
            label_a: None,
            prob_a: None,
            label_b: None,
            prob_b: None,
            features_a: None,
            features_b: None,
            identifiers: None,
            model_a: None,
            model_b: None,
            accuracy_a: None,
            accuracy_b: None,
        }
    }

    pub fn from_predictions(
        hospital: &str,
        a: ModelPrediction,
        b: ModelPrediction,
        identifiers: Vec<String>,
    ) -> Self {
        Self {
            label_a: Some(a.labels),
            prob_a: Some(a.recovery_probabilities),
            features_a: Some(a.features),
            model_a: Some(a.model),
            accuracy_a: Some(a.accuracy),
            label_b: Some(b.labels),
            prob_b: Some(b.recovery_probabilities),
            features_b: Some(b.features),
            model_b: Some(b.model),
            accuracy_b: Some(b.accuracy),
            identifiers: Some(identifiers),
            ..Self::empty(hospital)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.label_a.is_none() && self.label_b.is_none()
    }

    /// One-line summary per model for the first patient, e.g.
    /// "recovery probability 72.3%, accuracy 85.0%"
    pub fn summary(&self) -> Vec<String> {
        let first = |probs: &Option<Vec<f64>>| probs.as_ref().and_then(|p| p.first().copied());
        [
            (&self.model_a, first(&self.prob_a), self.accuracy_a),
            (&self.model_b, first(&self.prob_b), self.accuracy_b),
        ]
        .into_iter()
        .filter_map(|(model, prob, accuracy)| {
            let line = format!(
                "recovery probability {:.1}%, accuracy {:.1}%",
                prob? * 100.0,
                accuracy? * 100.0
            );
            Some(match model {
                Some(name) => format!("{name}: {line}"),
                None => line,
            })
        })
        .collect()
    }
}
