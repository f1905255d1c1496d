//! Schema normalization
//!
//! This module turns a raw intake frame into the model's column universe:
//! - First encounter per patient, padded identifiers
//! - Encounter-date filtering and age computation
//! - Identifier stripping and one-hot encoding
//! - Audiometric feature derivation

use crate::error::PipelineError;
use crate::features::{screen_lab_flags, FeatureDeriver};
use crate::schema::columns::{
    hl_type_column, BIRTH_COLUMN, DEFAULT_HL_TYPE, ENCOUNTER_DATE_COLUMN, HL_TYPE_COLUMN,
    HL_TYPE_LEVELS, IDENTIFYING_COLUMNS, ID_COLUMN, LT_EVENT_COLUMN, PTA_PREFIX, RT_EVENT_COLUMN,
    SEX_COLUMN, SEX_FEMALE_COLUMN, AGE_COLUMN,
};
use crate::schema::{FeatureFrame, Sex, Value};
use crate::types::NormalizedBatch;
use std::collections::HashSet;

/// Normalizer from raw intake frames to the model column universe
pub struct Normalizer;

impl Normalizer {
    /// Normalize a raw frame
    pub fn normalize(mut frame: FeatureFrame) -> Result<NormalizedBatch, PipelineError> {
        tracing::debug!(rows = frame.n_rows(), columns = frame.n_cols(), "normalizing frame");

        stage(&mut frame, "deduplicate", keep_first_encounter)?;
        stage(&mut frame, "identifiers", pad_identifiers)?;
        stage(&mut frame, "encounter_date", drop_undated_rows)?;
        stage(&mut frame, "age", assign_age)?;
        let identifiers = stage(&mut frame, "strip_identifiers", strip_identifiers)?;
        stage(&mut frame, "hl_type", encode_hl_type)?;
        stage(&mut frame, "sex", encode_sex)?;
        stage(&mut frame, "derive", FeatureDeriver::derive)?;
        stage(&mut frame, "drop_thresholds", drop_threshold_columns)?;

        let lab_screen = screen_lab_flags(&frame);
        tracing::info!(
            rows = frame.n_rows(),
            columns = frame.n_cols(),
            "normalized patient records"
        );

        Ok(NormalizedBatch {
            frame,
            identifiers,
            lab_screen,
        })
    }
}

/// Run one step, wrapping failures with the frame state at that point
fn stage<T, F>(frame: &mut FeatureFrame, name: &'static str, step: F) -> Result<T, PipelineError>
where
    F: FnOnce(&mut FeatureFrame) -> Result<T, PipelineError>,
{
    step(frame).map_err(|err| {
        let wrapped = match err {
            e @ PipelineError::Transformation { .. } => e,
            other => PipelineError::Transformation {
                stage: name,
                message: other.to_string(),
                columns: frame.column_list(),
                preview: frame.preview(5),
            },
        };
        tracing::error!(stage = name, error = %wrapped, "normalization failed");
        wrapped
    })
}

/// Keep the first row for each identifier; rows without one are dropped
fn keep_first_encounter(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let id_idx = frame.require_column(ID_COLUMN)?;
    let before = frame.n_rows();
    let mut seen = HashSet::new();
    let mut missing = 0usize;
    frame.retain_rows(|row| match row[id_idx].to_key() {
        Some(id) => seen.insert(id),
        None => {
            missing += 1;
            false
        }
    });
    if missing > 0 {
        tracing::warn!(dropped = missing, "dropped rows without an identifier");
    }
    tracing::debug!(before, after = frame.n_rows(), "kept first encounter per patient");
    Ok(())
}

/// Left-pad five- and six-character identifiers with `00`
pub fn pad_identifier(id: &str) -> String {
    match id.chars().count() {
        5 | 6 => format!("00{id}"),
        _ => id.to_string(),
    }
}

fn pad_identifiers(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let id_idx = frame.require_column(ID_COLUMN)?;
    frame.map_column(id_idx, |cell| match cell.to_key() {
        Some(id) => Value::Text(pad_identifier(&id)),
        None => Value::Null,
    });
    Ok(())
}

/// Drop rows with no encounter date or a placeholder date
fn drop_undated_rows(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let Some(idx) = frame.column_index(ENCOUNTER_DATE_COLUMN) else {
        return Ok(());
    };
    let before = frame.n_rows();
    frame.retain_rows(|row| match row[idx].to_key() {
        Some(date) => !date.contains("-00"),
        None => false,
    });
    let dropped = before - frame.n_rows();
    if dropped > 0 {
        tracing::warn!(dropped, "dropped rows with a missing or placeholder encounter date");
    }
    Ok(())
}

/// Year from the first four characters of a date cell
fn year_prefix(cell: &Value, column: &str) -> Result<Option<f64>, PipelineError> {
    let Some(text) = cell.to_key() else {
        return Ok(None);
    };
    let prefix: String = text.chars().take(4).collect();
    prefix.trim().parse::<f64>().map(Some).map_err(|_| {
        PipelineError::InvalidRecord(format!("{column} value {text:?} has no year prefix"))
    })
}

/// `Age` from the encounter and birth years; both date columns are dropped
fn assign_age(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let (Some(birth_idx), Some(date_idx)) = (
        frame.column_index(BIRTH_COLUMN),
        frame.column_index(ENCOUNTER_DATE_COLUMN),
    ) else {
        return Ok(());
    };

    let mut ages = Vec::with_capacity(frame.n_rows());
    for row in frame.rows() {
        let birth = year_prefix(&row[birth_idx], BIRTH_COLUMN)?;
        let encounter = year_prefix(&row[date_idx], ENCOUNTER_DATE_COLUMN)?;
        ages.push(Value::from(birth.zip(encounter).map(|(b, e)| e - b)));
    }
    frame.put_column(AGE_COLUMN, ages)?;
    frame.drop_columns(&[BIRTH_COLUMN, ENCOUNTER_DATE_COLUMN]);
    Ok(())
}

/// Collect the padded identifiers, then drop every identifying column
fn strip_identifiers(frame: &mut FeatureFrame) -> Result<Vec<String>, PipelineError> {
    let identifiers = frame
        .column(ID_COLUMN)
        .map(|cells| cells.iter().filter_map(|c| c.to_key()).collect())
        .unwrap_or_default();
    frame.drop_columns(&IDENTIFYING_COLUMNS);
    Ok(identifiers)
}

/// One-hot encode `HL_type`, guaranteeing the four known levels
fn encode_hl_type(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let idx = frame.ensure_column(HL_TYPE_COLUMN, Value::from(DEFAULT_HL_TYPE));
    let levels: Vec<Option<String>> = frame.rows().iter().map(|row| row[idx].to_key()).collect();
    frame.drop_columns(&[HL_TYPE_COLUMN]);

    let mut observed: Vec<&str> = levels.iter().flatten().map(String::as_str).collect();
    observed.sort_unstable();
    observed.dedup();
    for level in observed {
        let values = levels
            .iter()
            .map(|l| Value::Bool(l.as_deref() == Some(level)))
            .collect();
        frame.put_column(&hl_type_column(level), values)?;
    }
    for level in HL_TYPE_LEVELS {
        frame.ensure_column(&hl_type_column(level), Value::Bool(false));
    }
    Ok(())
}

fn is_female(cell: &Value) -> bool {
    match cell {
        Value::Text(s) => s.parse::<Sex>().map(|sex| sex == Sex::Female).unwrap_or(false),
        other => other.as_f64() == Some(2.0),
    }
}

/// `Sex_2.0` from `Sex`, which defaults to male when absent
fn encode_sex(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let idx = frame.ensure_column(SEX_COLUMN, Value::Number(1.0));
    let female = frame
        .rows()
        .iter()
        .map(|row| Value::Bool(is_female(&row[idx])))
        .collect();
    frame.put_column(SEX_FEMALE_COLUMN, female)?;
    frame.drop_columns(&[SEX_COLUMN]);
    Ok(())
}

/// Drop raw thresholds and ear events once the side columns exist
fn drop_threshold_columns(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    frame.retain_columns(|name| {
        !name.starts_with(PTA_PREFIX) && name != LT_EVENT_COLUMN && name != RT_EVENT_COLUMN
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordAdapter;
    use pretty_assertions::assert_eq;

    fn make_test_frame(json: &str) -> FeatureFrame {
        RecordAdapter::frame_from_array(json).unwrap()
    }

    #[test]
    fn test_first_encounter_and_padding() {
        let frame = make_test_frame(
            r#"[
                {"ID": 12345, "Side": 1, "HL_duration": 3},
                {"ID": 12345, "Side": 1, "HL_duration": 9},
                {"ID": "1234567", "Side": 2, "HL_duration": 1},
                {"ID": null, "Side": 2, "HL_duration": 1}
            ]"#,
        );
        let batch = Normalizer::normalize(frame).unwrap();

        assert_eq!(batch.identifiers, vec!["0012345", "1234567"]);
        assert_eq!(batch.frame.n_rows(), 2);
        assert_eq!(batch.frame.get(0, "HL_duration"), Some(&Value::Number(3.0)));
        assert!(!batch.frame.has_column("ID"));
    }

    #[test]
    fn test_placeholder_dates_dropped_and_age() {
        let frame = make_test_frame(
            r#"[
                {"ID": 1, "Birth": "1970-03-02", "test_date": "2024-05-01"},
                {"ID": 2, "Birth": "1980-01-01", "test_date": "2024-00-01"},
                {"ID": 3, "Birth": "1980-01-01", "test_date": null},
                {"ID": 4, "Birth": null, "test_date": "2023-01-01"}
            ]"#,
        );
        let batch = Normalizer::normalize(frame).unwrap();

        assert_eq!(batch.identifiers, vec!["1", "4"]);
        assert_eq!(batch.frame.get(0, "Age"), Some(&Value::Number(54.0)));
        assert_eq!(batch.frame.get(1, "Age"), Some(&Value::Null));
        assert!(!batch.frame.has_column("Birth"));
        assert!(!batch.frame.has_column("test_date"));
    }

    #[test]
    fn test_hl_type_and_sex_encoding() {
        let frame = make_test_frame(
            r#"[
                {"ID": 1, "HL_type": "flat", "Sex": 2},
                {"ID": 2, "HL_type": "profound", "Sex": 1}
            ]"#,
        );
        let batch = Normalizer::normalize(frame).unwrap();
        let f = &batch.frame;

        assert_eq!(f.get(0, "HL_type_flat"), Some(&Value::Bool(true)));
        assert_eq!(f.get(1, "HL_type_flat"), Some(&Value::Bool(false)));
        assert_eq!(f.get(1, "HL_type_profound"), Some(&Value::Bool(true)));
        assert_eq!(f.get(0, "HL_type_irregular"), Some(&Value::Bool(false)));
        assert_eq!(f.get(0, "Sex_2.0"), Some(&Value::Bool(true)));
        assert_eq!(f.get(1, "Sex_2.0"), Some(&Value::Bool(false)));
        assert!(!f.has_column("Sex"));
        assert!(!f.has_column("HL_type"));
    }

    #[test]
    fn test_defaults_when_columns_absent() {
        let batch = Normalizer::normalize(make_test_frame(r#"[{"ID": 1}]"#)).unwrap();
        let f = &batch.frame;

        assert_eq!(f.get(0, "HL_type_irregular"), Some(&Value::Bool(true)));
        assert_eq!(f.get(0, "HL_type_descending"), Some(&Value::Bool(false)));
        assert_eq!(f.get(0, "Sex_2.0"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_threshold_columns_replaced_by_sides() {
        let frame = make_test_frame(
            r#"[{"ID": 1, "Side": 1, "PTA_LT_AC_500": 30, "PTA_RT_AC_500": 70}]"#,
        );
        let batch = Normalizer::normalize(frame).unwrap();
        let f = &batch.frame;

        assert_eq!(f.get(0, "affected_side_500"), Some(&Value::Number(70.0)));
        assert_eq!(f.get(0, "normal_side_500"), Some(&Value::Number(30.0)));
        assert!(f.columns().iter().all(|c| !c.starts_with("PTA_")));
        assert!(!f.has_column("LT_event"));
        assert!(!f.has_column("RT_event"));
    }

    #[test]
    fn test_failure_carries_frame_state() {
        let frame = make_test_frame(r#"[{"ID": 1, "Birth": "abcd", "test_date": "2024-01-01"}]"#);
        match Normalizer::normalize(frame).unwrap_err() {
            PipelineError::Transformation {
                stage,
                columns,
                preview,
                ..
            } => {
                assert_eq!(stage, "age");
                assert!(columns.contains("Birth"));
                assert!(preview.contains("abcd"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_identifier_column() {
        let err = Normalizer::normalize(make_test_frame(r#"[{"Side": 1}]"#)).unwrap_err();
        assert!(matches!(err, PipelineError::Transformation { stage: "deduplicate", .. }));
    }
}
