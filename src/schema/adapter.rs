//! Intake adapter for patient records
//!
//! Parses JSON arrays or NDJSON into typed [`PatientRecord`]s, or directly into
//! a [`FeatureFrame`] when the caller needs absent fields to stay absent.

use super::frame::FeatureFrame;
use super::record::{PatientRecord, ValidationError};
use crate::error::PipelineError;

type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Adapter for reading patient records
pub struct RecordAdapter;

impl RecordAdapter {
    /// Parse a JSON string containing an array of patient records
    pub fn parse_array(json: &str) -> Result<Vec<PatientRecord>, PipelineError> {
        let records: Vec<PatientRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON (one patient record per line)
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<PatientRecord>, PipelineError> {
        parse_lines(ndjson)
    }

    /// Parse a JSON array of records into a raw frame
    pub fn frame_from_array(json: &str) -> Result<FeatureFrame, PipelineError> {
        let objects: Vec<JsonObject> = serde_json::from_str(json)?;
        FeatureFrame::from_json_rows(&objects)
    }

    /// Parse NDJSON records into a raw frame
    pub fn frame_from_ndjson(ndjson: &str) -> Result<FeatureFrame, PipelineError> {
        let objects: Vec<JsonObject> = parse_lines(ndjson)?;
        FeatureFrame::from_json_rows(&objects)
    }

    /// Validate a batch of records, returning only the failures
    pub fn validate_records(records: &[PatientRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .map(|(idx, record)| ValidationResult {
                index: idx,
                patient_id: Some(record.id.clone()).filter(|id| !id.is_empty()),
                result: record.validate().err(),
            })
            .filter(|r| r.result.is_some())
            .collect()
    }
}

fn parse_lines<T: serde::de::DeserializeOwned>(ndjson: &str) -> Result<Vec<T>, PipelineError> {
    let mut items = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(item) => items.push(item),
            Err(e) => {
                return Err(PipelineError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(items)
}

/// Result of record validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub patient_id: Option<String>,
    pub result: Option<ValidationError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let ndjson = "{\"ID\": 1, \"Side\": \"Right\"}\n\n{\"ID\": 2, \"Side\": \"Left\"}\n";
        let records = RecordAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "2");
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let ndjson = "{\"ID\": 1}\nnot json\n";
        let err = RecordAdapter::parse_ndjson(ndjson).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_frame_keeps_structural_absence() {
        let frame = RecordAdapter::frame_from_array(r#"[{"ID": 1, "Side": 1}]"#).unwrap();
        assert_eq!(frame.columns(), &["ID", "Side"]);
        assert!(!frame.has_column("AST"));
    }

    #[test]
    fn test_validate_records_returns_failures() {
        let records = RecordAdapter::parse_array(
            r#"[
                {"ID": 1, "test_date": "2024-01-05"},
                {"ID": 2, "test_date": "2024-00-05"},
                {"ID": "", "test_date": "2024-01-05"}
            ]"#,
        )
        .unwrap();

        let failures = RecordAdapter::validate_records(&records);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].patient_id.as_deref(), Some("2"));
        assert_eq!(failures[1].patient_id, None);
    }
}
