//! Patient intake record
//!
//! One row per patient encounter, as supplied by the intake form. Numeric
//! fields are optional: `None` means "not measured", never zero.

use super::columns::{
    pta_column, Ear, BIRTH_COLUMN, ENCOUNTER_DATE_COLUMN, FREQUENCIES, HL_TYPE_COLUMN, LAB_FIELDS,
};
use super::frame::FeatureFrame;
use crate::error::PipelineError;
use chrono::NaiveDate;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Lowest plausible air-conduction threshold (dB HL)
pub const MIN_THRESHOLD_DB: f64 = -10.0;
/// Highest plausible air-conduction threshold (dB HL)
pub const MAX_THRESHOLD_DB: f64 = 130.0;

#[derive(Deserialize)]
#[serde(untagged)]
enum CodeOrLabel {
    Code(f64),
    Label(String),
}

/// Affected ear (1 = right, 2 = left)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Right,
    Left,
}

impl Side {
    pub fn code(&self) -> u8 {
        match self {
            Side::Right => 1,
            Side::Left => 2,
        }
    }

    pub fn from_code(code: f64) -> Option<Self> {
        match code {
            c if c == 1.0 => Some(Side::Right),
            c if c == 2.0 => Some(Side::Left),
            _ => None,
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "right" | "r" | "1" => Ok(Side::Right),
            "left" | "l" | "2" => Ok(Side::Left),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

impl Serialize for Side {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Side {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match CodeOrLabel::deserialize(deserializer)? {
            CodeOrLabel::Code(c) => {
                Side::from_code(c).ok_or_else(|| de::Error::custom(format!("invalid side code: {c}")))
            }
            CodeOrLabel::Label(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Sex as coded at intake (1 = male, 2 = female)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn code(&self) -> u8 {
        match self {
            Sex::Male => 1,
            Sex::Female => 2,
        }
    }

    pub fn from_code(code: f64) -> Option<Self> {
        match code {
            c if c == 1.0 => Some(Sex::Male),
            c if c == 2.0 => Some(Sex::Female),
            _ => None,
        }
    }
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" | "1" => Ok(Sex::Male),
            "female" | "f" | "2" => Ok(Sex::Female),
            other => Err(format!("unknown sex: {other}")),
        }
    }
}

impl Serialize for Sex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Sex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match CodeOrLabel::deserialize(deserializer)? {
            CodeOrLabel::Code(c) => {
                Sex::from_code(c).ok_or_else(|| de::Error::custom(format!("invalid sex code: {c}")))
            }
            CodeOrLabel::Label(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Audiogram shape category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HlType {
    Descending,
    Flat,
    Irregular,
    Profound,
}

/// Air-conduction thresholds for both ears (dB HL)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Audiogram {
    #[serde(rename = "PTA_RT_AC_250", default)]
    pub rt_250: Option<f64>,
    #[serde(rename = "PTA_LT_AC_250", default)]
    pub lt_250: Option<f64>,
    #[serde(rename = "PTA_RT_AC_500", default)]
    pub rt_500: Option<f64>,
    #[serde(rename = "PTA_LT_AC_500", default)]
    pub lt_500: Option<f64>,
    #[serde(rename = "PTA_RT_AC_1000", default)]
    pub rt_1000: Option<f64>,
    #[serde(rename = "PTA_LT_AC_1000", default)]
    pub lt_1000: Option<f64>,
    #[serde(rename = "PTA_RT_AC_2000", default)]
    pub rt_2000: Option<f64>,
    #[serde(rename = "PTA_LT_AC_2000", default)]
    pub lt_2000: Option<f64>,
    #[serde(rename = "PTA_RT_AC_3000", default)]
    pub rt_3000: Option<f64>,
    #[serde(rename = "PTA_LT_AC_3000", default)]
    pub lt_3000: Option<f64>,
    #[serde(rename = "PTA_RT_AC_4000", default)]
    pub rt_4000: Option<f64>,
    #[serde(rename = "PTA_LT_AC_4000", default)]
    pub lt_4000: Option<f64>,
    #[serde(rename = "PTA_RT_AC_8000", default)]
    pub rt_8000: Option<f64>,
    #[serde(rename = "PTA_LT_AC_8000", default)]
    pub lt_8000: Option<f64>,
}

impl Audiogram {
    /// Threshold for one ear and frequency
    pub fn threshold(&self, ear: Ear, frequency: u32) -> Option<f64> {
        match (ear, frequency) {
            (Ear::Right, 250) => self.rt_250,
            (Ear::Left, 250) => self.lt_250,
            (Ear::Right, 500) => self.rt_500,
            (Ear::Left, 500) => self.lt_500,
            (Ear::Right, 1000) => self.rt_1000,
            (Ear::Left, 1000) => self.lt_1000,
            (Ear::Right, 2000) => self.rt_2000,
            (Ear::Left, 2000) => self.lt_2000,
            (Ear::Right, 3000) => self.rt_3000,
            (Ear::Left, 3000) => self.lt_3000,
            (Ear::Right, 4000) => self.rt_4000,
            (Ear::Left, 4000) => self.lt_4000,
            (Ear::Right, 8000) => self.rt_8000,
            (Ear::Left, 8000) => self.lt_8000,
            _ => None,
        }
    }
}

/// Blood chemistry and hematology panel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabPanel {
    #[serde(rename = "WBC", default)]
    pub wbc: Option<f64>,
    #[serde(rename = "RBC", default)]
    pub rbc: Option<f64>,
    #[serde(rename = "Hb", default)]
    pub hb: Option<f64>,
    #[serde(rename = "PLT", default)]
    pub plt: Option<f64>,
    #[serde(rename = "Neutrophil", default)]
    pub neutrophil: Option<f64>,
    #[serde(rename = "Lymphocyte", default)]
    pub lymphocyte: Option<f64>,
    #[serde(rename = "AST", default)]
    pub ast: Option<f64>,
    #[serde(rename = "ALT", default)]
    pub alt: Option<f64>,
    #[serde(rename = "BUN", default)]
    pub bun: Option<f64>,
    #[serde(rename = "Cr", default)]
    pub cr: Option<f64>,
    #[serde(rename = "Glucose", default)]
    pub glucose: Option<f64>,
    #[serde(rename = "Total_Protein", default)]
    pub total_protein: Option<f64>,
    #[serde(rename = "Na", default)]
    pub na: Option<f64>,
    #[serde(rename = "K", default)]
    pub k: Option<f64>,
    #[serde(rename = "Cl", default)]
    pub cl: Option<f64>,
}

impl LabPanel {
    /// Value of a lab field by its column name
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "WBC" => self.wbc,
            "RBC" => self.rbc,
            "Hb" => self.hb,
            "PLT" => self.plt,
            "Neutrophil" => self.neutrophil,
            "Lymphocyte" => self.lymphocyte,
            "AST" => self.ast,
            "ALT" => self.alt,
            "BUN" => self.bun,
            "Cr" => self.cr,
            "Glucose" => self.glucose,
            "Total_Protein" => self.total_protein,
            "Na" => self.na,
            "K" => self.k,
            "Cl" => self.cl,
            _ => None,
        }
    }

    /// Measured values in intake order
    pub fn measured(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        LAB_FIELDS
            .iter()
            .filter_map(move |name| self.get(name).map(|v| (*name, v)))
    }
}

/// One patient encounter as entered at intake
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientRecord {
    #[serde(rename = "ID", deserialize_with = "de_identifier")]
    pub id: String,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "HSPTCD", default, skip_serializing_if = "Option::is_none")]
    pub hospital_code: Option<String>,
    /// Birth date, `YYYY-MM-DD`
    #[serde(rename = "Birth", default)]
    pub birth: Option<String>,
    /// Encounter (audiometry) date, `YYYY-MM-DD`
    #[serde(rename = "test_date", default)]
    pub test_date: Option<String>,
    #[serde(rename = "Clinic_date", default, skip_serializing_if = "Option::is_none")]
    pub clinic_date: Option<String>,
    #[serde(rename = "Sex", default)]
    pub sex: Option<Sex>,
    #[serde(rename = "Side", default)]
    pub side: Option<Side>,
    /// Days from symptom onset to presentation
    #[serde(rename = "HL_duration", default)]
    pub hl_duration: Option<f64>,
    #[serde(rename = "Steroid", default)]
    pub steroid: Option<u8>,
    #[serde(rename = "IT_dexa", default)]
    pub it_dexa: Option<u8>,
    #[serde(rename = "HBOT", default)]
    pub hbot: Option<u8>,
    #[serde(flatten)]
    pub audiogram: Audiogram,
    #[serde(flatten)]
    pub labs: LabPanel,
    #[serde(rename = "Dx_COM", default)]
    pub dx_com: Option<u8>,
    #[serde(rename = "Dx_SSNHL", default)]
    pub dx_ssnhl: Option<u8>,
    #[serde(rename = "Dx_Dizziness", default)]
    pub dx_dizziness: Option<u8>,
    #[serde(rename = "Dx_Tinnitus", default)]
    pub dx_tinnitus: Option<u8>,
    #[serde(rename = "Hx_HTN", default)]
    pub hx_htn: Option<u8>,
    #[serde(rename = "Hx_DM", default)]
    pub hx_dm: Option<u8>,
    #[serde(rename = "Hx_CRF", default)]
    pub hx_crf: Option<u8>,
    #[serde(rename = "Hx_MI", default)]
    pub hx_mi: Option<u8>,
    #[serde(rename = "Hx_stroke", default)]
    pub hx_stroke: Option<u8>,
    #[serde(rename = "Hx_cancer", default)]
    pub hx_cancer: Option<u8>,
    /// Any other history; free text counts as 1 when non-blank
    #[serde(rename = "Hx_others", default, deserialize_with = "de_flag_or_text")]
    pub hx_others: Option<u8>,
    #[serde(rename = "HL_type", default)]
    pub hl_type: Option<HlType>,
}

impl PatientRecord {
    /// Tabulate records into a frame.
    ///
    /// The hearing-loss-type and date columns are only emitted when at least
    /// one record carries a value, so that an unclassified batch takes the
    /// default type and an undated batch is not filtered out.
    pub fn to_frame(records: &[PatientRecord]) -> Result<FeatureFrame, PipelineError> {
        let objects = records
            .iter()
            .map(|record| match serde_json::to_value(record)? {
                serde_json::Value::Object(map) => Ok(map),
                _ => Err(PipelineError::ParseError(
                    "patient record did not serialize to an object".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let mut frame = FeatureFrame::from_json_rows(&objects)?;
        if records.iter().all(|r| r.hl_type.is_none()) {
            frame.drop_columns(&[HL_TYPE_COLUMN]);
        }
        if records.iter().all(|r| r.birth.is_none()) {
            frame.drop_columns(&[BIRTH_COLUMN]);
        }
        if records.iter().all(|r| r.test_date.is_none()) {
            frame.drop_columns(&[ENCOUNTER_DATE_COLUMN]);
        }
        Ok(frame)
    }

    /// Check the record for values the pipeline cannot interpret
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }

        let birth = self
            .birth
            .as_deref()
            .map(|d| parse_date(BIRTH_COLUMN, d))
            .transpose()?;
        let encounter = match self.test_date.as_deref() {
            Some(d) if d.contains("-00") => {
                return Err(ValidationError::PlaceholderDate(d.to_string()))
            }
            Some(d) => Some(parse_date(ENCOUNTER_DATE_COLUMN, d)?),
            None => None,
        };
        if let (Some(birth), Some(encounter)) = (birth, encounter) {
            if birth > encounter {
                return Err(ValidationError::BirthAfterEncounter { birth, encounter });
            }
        }

        for ear in [Ear::Left, Ear::Right] {
            for frequency in FREQUENCIES {
                if let Some(value) = self.audiogram.threshold(ear, frequency) {
                    if !(MIN_THRESHOLD_DB..=MAX_THRESHOLD_DB).contains(&value) {
                        return Err(ValidationError::ThresholdOutOfRange {
                            column: pta_column(ear, frequency),
                            value,
                        });
                    }
                }
            }
        }

        for (name, value) in self.labs.measured() {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidLabValue {
                    column: name.to_string(),
                    value,
                });
            }
        }

        for (name, flag) in self.flags() {
            if let Some(v) = flag {
                if v > 1 {
                    return Err(ValidationError::InvalidFlag {
                        column: name.to_string(),
                        value: v,
                    });
                }
            }
        }

        Ok(())
    }

    fn flags(&self) -> [(&'static str, Option<u8>); 14] {
        [
            ("Steroid", self.steroid),
            ("IT_dexa", self.it_dexa),
            ("HBOT", self.hbot),
            ("Dx_COM", self.dx_com),
            ("Dx_SSNHL", self.dx_ssnhl),
            ("Dx_Dizziness", self.dx_dizziness),
            ("Dx_Tinnitus", self.dx_tinnitus),
            ("Hx_HTN", self.hx_htn),
            ("Hx_DM", self.hx_dm),
            ("Hx_CRF", self.hx_crf),
            ("Hx_MI", self.hx_mi),
            ("Hx_stroke", self.hx_stroke),
            ("Hx_cancer", self.hx_cancer),
            ("Hx_others", self.hx_others),
        ]
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ValidationError> {
    let head = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

fn de_identifier<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i.to_string()),
            None => Ok(n.to_string()),
        },
        other => Err(de::Error::custom(format!("invalid identifier: {other}"))),
    }
}

fn de_flag_or_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(u8::from(b))),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid flag: {n}"))),
        Some(serde_json::Value::String(s)) => Ok(Some(u8::from(!s.trim().is_empty()))),
        Some(other) => Err(de::Error::custom(format!("invalid flag: {other}"))),
    }
}

/// Validation errors for patient records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Patient identifier is empty")]
    EmptyIdentifier,

    #[error("Invalid date in {field}: {value}")]
    InvalidDate { field: &'static str, value: String },

    #[error("Encounter date is a placeholder: {0}")]
    PlaceholderDate(String),

    #[error("Birth date {birth} is after encounter date {encounter}")]
    BirthAfterEncounter {
        birth: NaiveDate,
        encounter: NaiveDate,
    },

    #[error("Threshold {column} = {value} dB outside plausible range")]
    ThresholdOutOfRange { column: String, value: f64 },

    #[error("Lab value {column} = {value} is not a valid measurement")]
    InvalidLabValue { column: String, value: f64 },

    #[error("Flag {column} = {value}, expected 0 or 1")]
    InvalidFlag { column: String, value: u8 },
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Right => write!(f, "Right"),
            Side::Left => write!(f, "Left"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::frame::Value;

    fn sample_record() -> PatientRecord {
        PatientRecord {
            id: "1234567".to_string(),
            birth: Some("1960-03-02".to_string()),
            test_date: Some("2023-05-10".to_string()),
            sex: Some(Sex::Female),
            side: Some(Side::Right),
            audiogram: Audiogram {
                rt_500: Some(60.0),
                lt_500: Some(15.0),
                ..Default::default()
            },
            labs: LabPanel {
                na: Some(140.0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_deserialize_form_labels() {
        let json = r#"{
            "ID": 123456,
            "Birth": "1970-01-01",
            "test_date": "2024-02-03",
            "Sex": "Female",
            "Side": "Left",
            "PTA_LT_AC_500": 70.0,
            "Na": 141.0,
            "Hx_others": "asthma",
            "HL_type": "flat"
        }"#;

        let record: PatientRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "123456");
        assert_eq!(record.sex, Some(Sex::Female));
        assert_eq!(record.side, Some(Side::Left));
        assert_eq!(record.audiogram.threshold(Ear::Left, 500), Some(70.0));
        assert_eq!(record.labs.get("Na"), Some(141.0));
        assert_eq!(record.hx_others, Some(1));
        assert_eq!(record.hl_type, Some(HlType::Flat));
    }

    #[test]
    fn test_deserialize_codes() {
        let json = r#"{"ID": "9", "Sex": 1, "Side": 2, "Hx_others": ""}"#;
        let record: PatientRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.sex, Some(Sex::Male));
        assert_eq!(record.side, Some(Side::Left));
        assert_eq!(record.hx_others, Some(0));

        let bad = r#"{"ID": "9", "Side": 3}"#;
        assert!(serde_json::from_str::<PatientRecord>(bad).is_err());
    }

    #[test]
    fn test_to_frame_keeps_null_cells() {
        let frame = PatientRecord::to_frame(&[sample_record()]).unwrap();

        assert!(frame.has_column("PTA_RT_AC_250"));
        assert_eq!(frame.get(0, "PTA_RT_AC_250"), Some(&Value::Null));
        assert_eq!(frame.get(0, "Side"), Some(&Value::Number(1.0)));
        assert_eq!(frame.get(0, "Sex"), Some(&Value::Number(2.0)));
        assert!(frame.has_column("K"));
        assert!(!frame.has_column("HL_type"));
        assert!(!frame.has_column("Name"));
    }

    #[test]
    fn test_to_frame_emits_hl_type_when_present() {
        let mut record = sample_record();
        record.hl_type = Some(HlType::Profound);
        let frame = PatientRecord::to_frame(&[record, sample_record()]).unwrap();

        assert_eq!(frame.get(0, "HL_type"), Some(&Value::from("profound")));
        assert_eq!(frame.get(1, "HL_type"), Some(&Value::Null));
    }

    #[test]
    fn test_validation() {
        assert!(sample_record().validate().is_ok());

        let mut record = sample_record();
        record.test_date = Some("2023-00-10".to_string());
        assert!(matches!(
            record.validate(),
            Err(ValidationError::PlaceholderDate(_))
        ));

        let mut record = sample_record();
        record.audiogram.lt_8000 = Some(150.0);
        assert!(matches!(
            record.validate(),
            Err(ValidationError::ThresholdOutOfRange { .. })
        ));

        let mut record = sample_record();
        record.birth = Some("2024-01-01".to_string());
        assert!(matches!(
            record.validate(),
            Err(ValidationError::BirthAfterEncounter { .. })
        ));

        let mut record = sample_record();
        record.dx_com = Some(2);
        assert!(matches!(
            record.validate(),
            Err(ValidationError::InvalidFlag { .. })
        ));
    }
}
