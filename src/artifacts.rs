//! Artifact storage
//!
//! Models, scalers and accuracy notes are looked up by key. A missing scaler
//! or accuracy note degrades the prediction instead of failing it.

use crate::error::PipelineError;
use crate::hospital::{Hospital, ModelKind};
use crate::model::StandardScaler;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Accuracy reported when the accuracy note is missing or unreadable
pub const DEFAULT_ACCURACY: f64 = 0.75;

/// Key-value lookup of artifact bytes
pub trait ArtifactStore: Send + Sync {
    /// Bytes stored under `key`, `None` when there is no such artifact
    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError>;
}

/// Artifacts stored as files under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, PipelineError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PipelineError::Artifact(format!("invalid artifact key {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

impl ArtifactStore for DirectoryStore {
    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        let path = self.resolve(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::Artifact(format!("{}: {e}", path.display()))),
        }
    }
}

/// In-memory artifacts
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), bytes.into());
    }
}

impl ArtifactStore for MemoryStore {
    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        Ok(self.entries.get(key).cloned())
    }
}

/// Decimal number pattern of accuracy notes
static ACCURACY_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// First decimal number (`\d+\.\d+`) in an accuracy note
pub fn parse_accuracy(text: &str) -> Option<f64> {
    let pattern = ACCURACY_PATTERN
        .get_or_init(|| Regex::new(r"\d+\.\d+").ok())
        .as_ref()?;
    pattern.find(text)?.as_str().parse().ok()
}

/// Accuracy of a site's model, or [`DEFAULT_ACCURACY`] when unavailable
pub fn load_accuracy(store: &dyn ArtifactStore, hospital: Hospital, model: ModelKind) -> f64 {
    let key = hospital.accuracy_key(model);
    let parsed = match store.fetch(&key) {
        Ok(Some(bytes)) => parse_accuracy(&String::from_utf8_lossy(&bytes)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "failed to read accuracy note");
            None
        }
    };
    parsed.unwrap_or_else(|| {
        tracing::warn!(key = %key, default = DEFAULT_ACCURACY, "accuracy unavailable, using default");
        DEFAULT_ACCURACY
    })
}

/// The site's scaler, `None` when it has none or it cannot be read
pub fn load_scaler(store: &dyn ArtifactStore, hospital: Hospital) -> Option<StandardScaler> {
    let key = hospital.scaler_key();
    let bytes = match store.fetch(&key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            if hospital.uses_scaler() {
                tracing::warn!(key = %key, "scaler artifact missing, features stay unscaled");
            }
            return None;
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "failed to read scaler artifact");
            return None;
        }
    };
    match StandardScaler::from_json(&String::from_utf8_lossy(&bytes)) {
        Ok(scaler) => Some(scaler),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "invalid scaler artifact");
            None
        }
    }
}
