//! SSNHL Outcome - recovery prediction for sudden sensorineural hearing loss
//!
//! The crate turns raw clinical intake records into the fixed numeric feature
//! vectors consumed by per-hospital tree models, through a deterministic
//! pipeline: schema normalization → feature derivation → iterative imputation
//! → finalization → per-model reindexing and inference.
//!
//! ## Modules
//!
//! - **Preprocessing**: [`pipeline::FeaturePipeline`] and its stages
//! - **Prediction**: [`pipeline::Predictor`] configured by a hospital profile
//! - **Advisory**: lab values outside their reference ranges

pub mod advisory;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod features;
pub mod finalizer;
pub mod hospital;
pub mod imputer;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::PipelineConfig;
pub use error::{ModelError, PipelineError};
pub use hospital::{Hospital, HospitalProfile, ModelKind};
pub use model::{Classifier, Scaler, StandardScaler};
pub use pipeline::{preprocess_json, preprocess_records, FeaturePipeline, Predictor};
pub use types::{FinalizedBatch, PredictionOutcome};

// Schema exports
pub use schema::{PatientRecord, RecordAdapter, FEATURE_SCHEMA_VERSION};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "ssnhl-outcome";
