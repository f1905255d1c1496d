//! Feature finalization
//!
//! This module fixes an imputed frame to the trained schema: every model
//! column present in order, severity bands and lab flags recomputed on the
//! imputed values, and every cell numeric.

use crate::error::PipelineError;
use crate::features::{assign_imputed_severity, assign_lab_flags};
use crate::schema::columns::BOOL_COLUMNS;
use crate::schema::{feature_schema, FeatureFrame, Value, FINAL_COLUMNS};
use crate::types::{FinalizedBatch, LabFlagScreen};

/// Finalizer from imputed frames to fixed-schema batches
pub struct Finalizer;

impl Finalizer {
    /// Finalize an imputed frame
    pub fn finalize(
        frame: &FeatureFrame,
        identifiers: Vec<String>,
        lab_screen: LabFlagScreen,
    ) -> Result<FinalizedBatch, PipelineError> {
        // before reindexing, so absent threshold columns are not read as 0 dB
        let mut frame = frame.clone();
        assign_imputed_severity(&mut frame).map_err(|e| {
            tracing::error!(
                error = %e,
                columns = %frame.column_list(),
                rows = %frame.preview(5),
                "severity recomputation failed"
            );
            PipelineError::Finalization(e.to_string())
        })?;

        let mut frame = frame.reindex(&FINAL_COLUMNS, Value::Number(0.0));

        for name in BOOL_COLUMNS {
            let idx = frame.require_column(name)?;
            frame.map_column(idx, |cell| Value::Bool(truthy(cell)));
        }

        assign_lab_flags(&mut frame).map_err(|e| {
            tracing::error!(
                error = %e,
                columns = %frame.column_list(),
                rows = %frame.preview(5),
                "lab flag assignment failed"
            );
            PipelineError::Finalization(e.to_string())
        })?;

        let rows: Vec<Vec<f64>> = frame
            .rows()
            .iter()
            .map(|row| row.iter().map(coerce_numeric).collect())
            .collect();

        if rows.len() != identifiers.len() {
            tracing::warn!(
                rows = rows.len(),
                identifiers = identifiers.len(),
                "identifier count differs from row count"
            );
        }

        let mut batch = FinalizedBatch::new(feature_schema(), identifiers, rows);
        batch.lab_screen = lab_screen;
        tracing::debug!(rows = batch.n_rows(), "finalized feature batch");
        Ok(batch)
    }
}

/// Boolean view of a cell; nonzero numbers and non-empty text are true
fn truthy(cell: &Value) -> bool {
    match cell {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0,
        Value::Text(s) => !s.is_empty(),
    }
}

/// Numeric value of a cell; blank, unparsable and missing cells become 0
fn coerce_numeric(cell: &Value) -> f64 {
    let value = match cell {
        Value::Text(s) if s.trim().is_empty() => None,
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        other => other.as_f64(),
    };
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}
