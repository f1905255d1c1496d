//! Error types for the SSNHL outcome pipeline

use thiserror::Error;

/// Errors that can occur while building features or predicting outcomes
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to parse patient records: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Transformation error in {stage}: {message} (columns: [{columns}]; rows: {preview})")]
    Transformation {
        stage: &'static str,
        message: String,
        columns: String,
        preview: String,
    },

    #[error("Imputation error: {message} (columns: [{columns}]; rows: {preview})")]
    Imputation {
        message: String,
        columns: String,
        preview: String,
    },

    #[error("Finalization error: {0}")]
    Finalization(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Unknown hospital: {0}")]
    UnknownHospital(String),

    #[error("Invalid patient record: {0}")]
    InvalidRecord(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors raised by model and scaler artifacts
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Feature count mismatch: expected {expected}, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("Model returned {0} probability columns, need at least 2")]
    MissingPositiveClass(usize),

    #[error("Model returned {actual} rows for {expected} inputs")]
    RowMismatch { expected: usize, actual: usize },

    #[error("Scaler has no statistics for column {0}")]
    UnknownColumn(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}
