//! Pipeline configuration
//!
//! Settings are plain serde structs with defaults matching the trained
//! models, so an empty JSON object is a valid configuration.

use crate::error::PipelineError;
use crate::imputer::ImputerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rows shown in diagnostic previews by default
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

/// Settings for the preprocessing pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub imputer: ImputerConfig,
    /// Rows included in error previews
    pub preview_rows: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            imputer: ImputerConfig::default(),
            preview_rows: DEFAULT_PREVIEW_ROWS,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let imputer = &self.imputer;
        if imputer.max_iter == 0 {
            return Err(PipelineError::Config("imputer.max_iter must be at least 1".into()));
        }
        if !imputer.tol.is_finite() || imputer.tol < 0.0 {
            return Err(PipelineError::Config(format!(
                "imputer.tol must be a non-negative number, got {}",
                imputer.tol
            )));
        }
        if !imputer.ridge_alpha.is_finite() || imputer.ridge_alpha <= 0.0 {
            return Err(PipelineError::Config(format!(
                "imputer.ridge_alpha must be positive, got {}",
                imputer.ridge_alpha
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imputer::ImputationOrder;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.imputer.max_iter, 10);
        assert_eq!(config.imputer.random_seed, 42);
    }

    #[test]
    fn test_partial_override() {
        let config =
            PipelineConfig::from_json(r#"{"imputer": {"order": "random", "max_iter": 3}}"#).unwrap();
        assert_eq!(config.imputer.order, ImputationOrder::Random);
        assert_eq!(config.imputer.max_iter, 3);
        assert_eq!(config.imputer.tol, 1e-3);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(PipelineConfig::from_json(r#"{"imputer": {"max_iter": 0}}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"imputer": {"ridge_alpha": -1.0}}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"imputer": {"order": "sideways"}}"#).is_err());
    }
}
