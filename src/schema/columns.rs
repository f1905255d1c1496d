//! Column universe of the feature pipeline
//!
//! The finalized column list is the contract between this pipeline and the
//! trained models: names and order must match what each model was fit on.

use serde::{Deserialize, Serialize};

/// Version tag of the finalized feature schema
pub const FEATURE_SCHEMA_VERSION: &str = "ssnhl.features.v1";

/// Audiometric test frequencies (Hz)
pub const FREQUENCIES: [u32; 7] = [250, 500, 1000, 2000, 3000, 4000, 8000];

/// Frequencies entering the four-frequency pure-tone average
pub const FOUR_FREQUENCIES: [u32; 4] = [500, 1000, 2000, 4000];

/// Laboratory fields in intake order
pub const LAB_FIELDS: [&str; 15] = [
    "WBC",
    "RBC",
    "Hb",
    "PLT",
    "Neutrophil",
    "Lymphocyte",
    "AST",
    "ALT",
    "BUN",
    "Cr",
    "Glucose",
    "Total_Protein",
    "Na",
    "K",
    "Cl",
];

pub const TREATMENT_FIELDS: [&str; 3] = ["Steroid", "IT_dexa", "HBOT"];

pub const DIAGNOSIS_FIELDS: [&str; 4] = ["Dx_COM", "Dx_SSNHL", "Dx_Dizziness", "Dx_Tinnitus"];

pub const HISTORY_FIELDS: [&str; 7] = [
    "Hx_HTN",
    "Hx_DM",
    "Hx_CRF",
    "Hx_MI",
    "Hx_stroke",
    "Hx_cancer",
    "Hx_others",
];

pub const ID_COLUMN: &str = "ID";
pub const BIRTH_COLUMN: &str = "Birth";
pub const ENCOUNTER_DATE_COLUMN: &str = "test_date";
pub const SEX_COLUMN: &str = "Sex";
pub const SIDE_COLUMN: &str = "Side";
pub const HL_TYPE_COLUMN: &str = "HL_type";
pub const AGE_COLUMN: &str = "Age";

pub const LT_EVENT_COLUMN: &str = "LT_event";
pub const RT_EVENT_COLUMN: &str = "RT_event";

pub const MEAN_AFFECTED_COLUMN: &str = "mean_affected_four";
pub const MEAN_NORMAL_COLUMN: &str = "mean_normal_four";
pub const HL_SEVERITY_COLUMN: &str = "HL_severity";
pub const NORMAL_SEVERITY_COLUMN: &str = "Normal_severity";

/// Columns removed by the normalizer because they identify the patient or site
pub const IDENTIFYING_COLUMNS: [&str; 4] = ["HSPTCD", "ID", "Name", "Clinic_date"];

/// Hearing-loss-type levels with a guaranteed one-hot column
pub const HL_TYPE_LEVELS: [&str; 4] = ["descending", "flat", "irregular", "profound"];

/// Level assumed when no hearing-loss-type column is supplied
pub const DEFAULT_HL_TYPE: &str = "irregular";

/// Prefix shared by every raw pure-tone threshold column
pub const PTA_PREFIX: &str = "PTA_";

pub const SEX_FEMALE_COLUMN: &str = "Sex_2.0";

/// Columns cast to boolean during finalization
pub const BOOL_COLUMNS: [&str; 5] = [
    "HL_type_descending",
    "HL_type_flat",
    "HL_type_irregular",
    "HL_type_profound",
    SEX_FEMALE_COLUMN,
];

/// Trained feature schema, in model order
pub const FINAL_COLUMNS: [&str; 74] = [
    "HL_duration",
    "Steroid",
    "IT_dexa",
    "HBOT",
    "HL_severity",
    "Age",
    "WBC",
    "RBC",
    "Hb",
    "PLT",
    "Neutrophil",
    "Lymphocyte",
    "AST",
    "ALT",
    "BUN",
    "Cr",
    "Glucose",
    "Total_Protein",
    "Na",
    "K",
    "Cl",
    "Dx_COM",
    "Dx_SSNHL",
    "Dx_Dizziness",
    "Dx_Tinnitus",
    "Hx_HTN",
    "Hx_DM",
    "Hx_CRF",
    "Hx_MI",
    "Hx_stroke",
    "Hx_cancer",
    "Hx_others",
    "affected_side_250",
    "affected_side_500",
    "affected_side_1000",
    "affected_side_2000",
    "affected_side_3000",
    "affected_side_4000",
    "affected_side_8000",
    "normal_side_250",
    "normal_side_500",
    "normal_side_1000",
    "normal_side_2000",
    "normal_side_3000",
    "normal_side_4000",
    "normal_side_8000",
    "mean_affected_four",
    "mean_normal_four",
    "Normal_severity",
    "Hyper_Hb",
    "Hypo_Hb",
    "Hyper_natremia",
    "Hypo_natremia",
    "Hyper_WBC",
    "Hypo_WBC",
    "Hyper_Cr",
    "Hypo_Cr",
    "Hyper_ALT",
    "Hyper_AST",
    "Hyper_K",
    "Hypo_K",
    "Hyper_PLT",
    "Hypo_PLT",
    "Hyper_Protein",
    "Hypo_Protein",
    "Hyper_Glucose",
    "Hypo_Glucose",
    "Hyper_Cl",
    "Hypo_Cl",
    "HL_type_descending",
    "HL_type_flat",
    "HL_type_irregular",
    "HL_type_profound",
    SEX_FEMALE_COLUMN,
];

/// Continuous variables eligible for hospital-specific scaling
pub const CONTINUOUS_COLUMNS: [&str; 35] = [
    "HL_duration",
    "WBC",
    "RBC",
    "Hb",
    "PLT",
    "Neutrophil",
    "Lymphocyte",
    "AST",
    "ALT",
    "BUN",
    "Cr",
    "Glucose",
    "Total_Protein",
    "Na",
    "K",
    "Cl",
    "Age",
    "HL_severity",
    "Normal_severity",
    "affected_side_250",
    "affected_side_500",
    "affected_side_1000",
    "affected_side_2000",
    "affected_side_3000",
    "affected_side_4000",
    "affected_side_8000",
    "normal_side_250",
    "normal_side_500",
    "normal_side_1000",
    "normal_side_2000",
    "normal_side_3000",
    "normal_side_4000",
    "normal_side_8000",
    "mean_affected_four",
    "mean_normal_four",
];

/// Ear of an audiometric reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ear {
    Left,
    Right,
}

impl Ear {
    pub fn code(&self) -> &'static str {
        match self {
            Ear::Left => "LT",
            Ear::Right => "RT",
        }
    }
}

/// Raw air-conduction threshold column, e.g. `PTA_LT_AC_500`
pub fn pta_column(ear: Ear, frequency: u32) -> String {
    format!("{PTA_PREFIX}{}_AC_{frequency}", ear.code())
}

pub fn affected_column(frequency: u32) -> String {
    format!("affected_side_{frequency}")
}

pub fn normal_column(frequency: u32) -> String {
    format!("normal_side_{frequency}")
}

pub fn hl_type_column(level: &str) -> String {
    format!("{HL_TYPE_COLUMN}_{level}")
}

/// Measurement kind of a finalized column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Continuous,
    Ordinal,
    Binary,
}

/// Name and kind of one finalized column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Kind of a column of the trained schema
pub fn column_kind(name: &str) -> ColumnKind {
    if name == HL_SEVERITY_COLUMN || name == NORMAL_SEVERITY_COLUMN {
        ColumnKind::Ordinal
    } else if TREATMENT_FIELDS.contains(&name)
        || DIAGNOSIS_FIELDS.contains(&name)
        || HISTORY_FIELDS.contains(&name)
        || BOOL_COLUMNS.contains(&name)
        || name.starts_with("Hyper_")
        || name.starts_with("Hypo_")
    {
        ColumnKind::Binary
    } else {
        ColumnKind::Continuous
    }
}

/// The finalized schema with column kinds
pub fn feature_schema() -> Vec<ColumnSpec> {
    FINAL_COLUMNS
        .iter()
        .map(|name| ColumnSpec {
            name: name.to_string(),
            kind: column_kind(name),
        })
        .collect()
}
