//! Hospital registry
//!
//! Each site has its own pair of trained models. The sites share one
//! preprocessing pipeline and differ only in artifacts and in whether their
//! continuous features were standardized during training.

use crate::error::PipelineError;
use crate::schema::columns::CONTINUOUS_COLUMNS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hospital site with its own trained models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hospital {
    All,
    Wonju,
    Sev,
    Hallym,
    Jeju,
    Hagen,
}

impl Hospital {
    pub const SITES: [Hospital; 6] = [
        Hospital::All,
        Hospital::Wonju,
        Hospital::Sev,
        Hospital::Hallym,
        Hospital::Jeju,
        Hospital::Hagen,
    ];

    /// Key used in artifact names
    pub fn key(&self) -> &'static str {
        match self {
            Hospital::All => "all",
            Hospital::Wonju => "wonju",
            Hospital::Sev => "sev",
            Hospital::Hallym => "hallym",
            Hospital::Jeju => "jeju",
            Hospital::Hagen => "hagen",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Hospital::All => "All hospitals",
            Hospital::Wonju => "Wonju Severance Christian Hospital",
            Hospital::Sev => "Sinchon-Gangnam Severance Hospital",
            Hospital::Hallym => "Hallym University Kangnam Sacred Heart Hospital",
            Hospital::Jeju => "Jeju National University Hospital",
            Hospital::Hagen => "Hagen Hospital",
        }
    }

    /// Whether the site's models were trained on standardized features
    pub fn uses_scaler(&self) -> bool {
        matches!(self, Hospital::Hallym)
    }

    pub fn profile(&self) -> HospitalProfile {
        HospitalProfile {
            hospital: *self,
            continuous_columns: CONTINUOUS_COLUMNS.iter().map(|c| c.to_string()).collect(),
            uses_scaler: self.uses_scaler(),
        }
    }

    /// Artifact key of a model's accuracy note
    pub fn accuracy_key(&self, model: ModelKind) -> String {
        format!("txt/{}_{}_accuracy.txt", self.key(), model.key())
    }

    /// Artifact key of the site's scaler
    pub fn scaler_key(&self) -> String {
        format!("scalers/{}_scaler.json", self.key())
    }
}

impl fmt::Display for Hospital {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Hospital {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Hospital::SITES
            .into_iter()
            .find(|h| h.key() == key)
            .ok_or_else(|| PipelineError::UnknownHospital(s.to_string()))
    }
}

/// The two model families trained per site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Lgbm,
    Xgb,
}

impl ModelKind {
    pub fn key(&self) -> &'static str {
        match self {
            ModelKind::Lgbm => "lgbm",
            ModelKind::Xgb => "xgb",
        }
    }
}

/// Per-site prediction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalProfile {
    pub hospital: Hospital,
    /// Columns passed through the scaler
    pub continuous_columns: Vec<String>,
    /// Whether a scaler artifact is expected
    pub uses_scaler: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_key() {
        assert_eq!("hallym".parse::<Hospital>().unwrap(), Hospital::Hallym);
        assert_eq!(" Jeju ".parse::<Hospital>().unwrap(), Hospital::Jeju);
        assert!(matches!(
            "seoul".parse::<Hospital>(),
            Err(PipelineError::UnknownHospital(_))
        ));
    }

    #[test]
    fn test_artifact_keys() {
        assert_eq!(
            Hospital::Wonju.accuracy_key(ModelKind::Lgbm),
            "txt/wonju_lgbm_accuracy.txt"
        );
        assert_eq!(Hospital::Hallym.scaler_key(), "scalers/hallym_scaler.json");
    }

    #[test]
    fn test_profiles() {
        let profiles: Vec<HospitalProfile> = Hospital::SITES.iter().map(|h| h.profile()).collect();
        assert_eq!(profiles.iter().filter(|p| p.uses_scaler).count(), 1);
        assert!(profiles.iter().all(|p| p.continuous_columns.len() == 35));
    }
}
