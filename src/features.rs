//! Feature derivation
//!
//! This module derives the audiometric and laboratory features from a frame:
//! - Ear-event indicators and affected/normal side assignment
//! - Four-frequency pure-tone averages and severity bands
//! - Laboratory abnormality flags

use crate::error::PipelineError;
use crate::schema::columns::{
    affected_column, normal_column, pta_column, Ear, FOUR_FREQUENCIES, FREQUENCIES,
    HL_SEVERITY_COLUMN, LT_EVENT_COLUMN, MEAN_AFFECTED_COLUMN, MEAN_NORMAL_COLUMN,
    NORMAL_SEVERITY_COLUMN, RT_EVENT_COLUMN, SIDE_COLUMN,
};
use crate::schema::{FeatureFrame, Side, Value};
use crate::types::LabFlagScreen;

/// Feature deriver for the audiometric columns of a frame
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Derive ear events, side-assigned thresholds, averages and severity bands
    pub fn derive(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
        assign_event_columns(frame)?;
        assign_side_columns(frame)?;
        assign_mean_columns(frame)?;
        assign_severity(frame, MEAN_AFFECTED_COLUMN, HL_SEVERITY_COLUMN)?;
        assign_severity(frame, MEAN_NORMAL_COLUMN, NORMAL_SEVERITY_COLUMN)?;
        Ok(())
    }
}

/// Side code of a cell; accepts numeric codes and form labels
fn side_code(value: &Value) -> Option<f64> {
    match value {
        Value::Text(s) => s.parse::<Side>().ok().map(|side| f64::from(side.code())),
        other => other.as_f64(),
    }
}

/// Add `LT_event` / `RT_event` when a `Side` column is present.
///
/// `Side` itself is rewritten to its numeric code, so form labels never reach
/// the imputer.
pub fn assign_event_columns(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let Some(side_idx) = frame.column_index(SIDE_COLUMN) else {
        return Ok(());
    };
    let codes: Vec<Option<f64>> = frame
        .rows()
        .iter()
        .map(|row| side_code(&row[side_idx]))
        .collect();
    frame.put_column(SIDE_COLUMN, codes.iter().map(|c| Value::from(*c)).collect())?;

    let lt: Vec<Value> = codes
        .iter()
        .map(|c| Value::Number(if *c == Some(2.0) { 1.0 } else { 0.0 }))
        .collect();
    let rt: Vec<Value> = codes
        .iter()
        .map(|c| Value::Number(if *c == Some(1.0) { 1.0 } else { 0.0 }))
        .collect();

    frame.put_column(LT_EVENT_COLUMN, lt)?;
    frame.put_column(RT_EVENT_COLUMN, rt)?;
    Ok(())
}

fn is_event(value: &Value, expected: f64) -> bool {
    value.as_f64() == Some(expected)
}

/// Assign `affected_side_f` / `normal_side_f` from the per-ear thresholds.
///
/// The affected ear is the one flagged by its own event indicator. A missing
/// threshold on the selected ear stays missing.
pub fn assign_side_columns(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    for frequency in FREQUENCIES {
        let (Some(lt_idx), Some(rt_idx)) = (
            frame.column_index(&pta_column(Ear::Left, frequency)),
            frame.column_index(&pta_column(Ear::Right, frequency)),
        ) else {
            continue;
        };
        let lt_event = frame.require_column(LT_EVENT_COLUMN)?;
        let rt_event = frame.require_column(RT_EVENT_COLUMN)?;

        let mut affected = Vec::with_capacity(frame.n_rows());
        let mut normal = Vec::with_capacity(frame.n_rows());
        for row in frame.rows() {
            let left = &row[lt_idx];
            let right = &row[rt_idx];

            let mut affected_cell = if is_event(&row[lt_event], 1.0) {
                left.clone()
            } else {
                Value::Null
            };
            if affected_cell.is_null() && is_event(&row[rt_event], 1.0) {
                affected_cell = right.clone();
            }

            let mut normal_cell = if is_event(&row[lt_event], 0.0) {
                left.clone()
            } else {
                Value::Null
            };
            if normal_cell.is_null() && is_event(&row[rt_event], 0.0) {
                normal_cell = right.clone();
            }

            affected.push(affected_cell);
            normal.push(normal_cell);
        }

        frame.put_column(&affected_column(frequency), affected)?;
        frame.put_column(&normal_column(frequency), normal)?;
    }
    Ok(())
}

/// Add the four-frequency means when all their source columns exist
pub fn assign_mean_columns(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let sets: [(&str, fn(u32) -> String); 2] = [
        (MEAN_AFFECTED_COLUMN, affected_column),
        (MEAN_NORMAL_COLUMN, normal_column),
    ];

    for (target, column_for) in sets {
        let sources: Option<Vec<usize>> = FOUR_FREQUENCIES
            .iter()
            .map(|f| frame.column_index(&column_for(*f)))
            .collect();
        let Some(sources) = sources else {
            continue;
        };

        let mut means = Vec::with_capacity(frame.n_rows());
        for row in frame.rows() {
            let mut sum = 0.0;
            let mut complete = true;
            for &idx in &sources {
                match &row[idx] {
                    Value::Text(s) => {
                        return Err(PipelineError::InvalidRecord(format!(
                            "non-numeric threshold {s:?} in {}",
                            frame.columns()[idx]
                        )))
                    }
                    cell => match cell.as_f64() {
                        Some(v) => sum += v,
                        None => complete = false,
                    },
                }
            }
            means.push(if complete {
                Value::Number(sum / FOUR_FREQUENCIES.len() as f64)
            } else {
                Value::Null
            });
        }
        frame.put_column(target, means)?;
    }
    Ok(())
}

/// Ordinal hearing-loss band of a four-frequency mean (dB HL)
pub fn severity_band(mean: Option<f64>) -> Option<u8> {
    let mean = mean.filter(|m| !m.is_nan())?;
    let band = if mean <= 25.0 {
        1
    } else if mean <= 40.0 {
        2
    } else if mean <= 60.0 {
        3
    } else if mean <= 80.0 {
        4
    } else {
        5
    };
    Some(band)
}

/// Write the severity band of `mean_column` into `target`; undefined when the
/// mean is missing or the mean column is absent
pub fn assign_severity(
    frame: &mut FeatureFrame,
    mean_column: &str,
    target: &str,
) -> Result<(), PipelineError> {
    let mean_idx = frame.column_index(mean_column);
    let bands: Vec<Value> = frame
        .rows()
        .iter()
        .map(|row| {
            let mean = mean_idx.and_then(|idx| row[idx].as_f64());
            severity_band(mean)
                .map(|b| Value::Number(f64::from(b)))
                .unwrap_or(Value::Null)
        })
        .collect();
    frame.put_column(target, bands)?;
    Ok(())
}

/// Recompute the four-frequency means and severity bands from imputed
/// side thresholds.
///
/// Frames without a mean column are left alone. A row whose mean was observed
/// keeps it, since imputation leaves observed thresholds untouched.
pub fn assign_imputed_severity(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    let present: Vec<(&str, &str)> = [
        (MEAN_AFFECTED_COLUMN, HL_SEVERITY_COLUMN),
        (MEAN_NORMAL_COLUMN, NORMAL_SEVERITY_COLUMN),
    ]
    .into_iter()
    .filter(|(mean, _)| frame.has_column(mean))
    .collect();
    if present.is_empty() {
        return Ok(());
    }

    assign_mean_columns(frame)?;
    for (mean, target) in present {
        assign_severity(frame, mean, target)?;
    }
    Ok(())
}

/// Threshold comparison of a lab flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    AtLeast,
    Above,
    AtMost,
    Below,
}

/// One laboratory abnormality flag
#[derive(Debug, Clone, Copy)]
pub struct LabFlagRule {
    pub flag: &'static str,
    pub field: &'static str,
    pub comparison: Comparison,
    pub threshold: f64,
}

impl LabFlagRule {
    const fn new(
        flag: &'static str,
        field: &'static str,
        comparison: Comparison,
        threshold: f64,
    ) -> Self {
        Self {
            flag,
            field,
            comparison,
            threshold,
        }
    }

    /// 1 when the value crosses the threshold; a missing value never does
    pub fn evaluate(&self, value: Option<f64>) -> u8 {
        let Some(v) = value else {
            return 0;
        };
        let hit = match self.comparison {
            Comparison::AtLeast => v >= self.threshold,
            Comparison::Above => v > self.threshold,
            Comparison::AtMost => v <= self.threshold,
            Comparison::Below => v < self.threshold,
        };
        u8::from(hit)
    }
}

/// Laboratory flag rules.
///
/// The sodium flags are named the other way round from their thresholds
/// (`Hypo_natremia` fires on high sodium). The trained models use these names,
/// so they must not be swapped without retraining.
pub const LAB_FLAG_RULES: [LabFlagRule; 19] = [
    LabFlagRule::new("Hyper_AST", "AST", Comparison::AtLeast, 40.0),
    LabFlagRule::new("Hypo_K", "K", Comparison::Below, 3.5),
    LabFlagRule::new("Hypo_natremia", "Na", Comparison::AtLeast, 145.0),
    LabFlagRule::new("Hyper_natremia", "Na", Comparison::AtMost, 135.0),
    LabFlagRule::new("Hypo_Glucose", "Glucose", Comparison::AtMost, 80.0),
    LabFlagRule::new("Hyper_Glucose", "Glucose", Comparison::AtLeast, 200.0),
    LabFlagRule::new("Hypo_Hb", "Hb", Comparison::Below, 11.0),
    LabFlagRule::new("Hyper_Hb", "Hb", Comparison::AtLeast, 17.0),
    LabFlagRule::new("Hyper_Cr", "Cr", Comparison::Above, 1.3),
    LabFlagRule::new("Hypo_Cr", "Cr", Comparison::Below, 0.2),
    LabFlagRule::new("Hyper_ALT", "ALT", Comparison::AtLeast, 40.0),
    LabFlagRule::new("Hyper_WBC", "WBC", Comparison::Above, 10.0),
    LabFlagRule::new("Hypo_WBC", "WBC", Comparison::Below, 4.0),
    LabFlagRule::new("Hyper_PLT", "PLT", Comparison::Above, 360.0),
    LabFlagRule::new("Hypo_PLT", "PLT", Comparison::Below, 165.0),
    LabFlagRule::new("Hyper_Protein", "Total_Protein", Comparison::Above, 8.1),
    LabFlagRule::new("Hypo_Protein", "Total_Protein", Comparison::Below, 6.2),
    LabFlagRule::new("Hyper_Cl", "Cl", Comparison::Above, 107.0),
    LabFlagRule::new("Hypo_Cl", "Cl", Comparison::Below, 98.0),
];

/// Lab fields the flag rules read
pub fn flagged_lab_fields() -> Vec<&'static str> {
    let mut fields: Vec<&'static str> = Vec::new();
    for rule in &LAB_FLAG_RULES {
        if !fields.contains(&rule.field) {
            fields.push(rule.field);
        }
    }
    fields
}

/// Value a rule reads from a row: an absent lab column reads as 0
fn lab_value(frame: &FeatureFrame, row: usize, field: &str) -> Option<f64> {
    match frame.get(row, field) {
        Some(cell) => cell.as_f64(),
        None => Some(0.0),
    }
}

/// Screen raw lab values before imputation.
///
/// Null cells are not flagged and the frame is left untouched; an absent lab
/// column reads as 0.
pub fn screen_lab_flags(frame: &FeatureFrame) -> LabFlagScreen {
    let rows = (0..frame.n_rows())
        .map(|row| {
            LAB_FLAG_RULES
                .iter()
                .map(|rule| rule.evaluate(lab_value(frame, row, rule.field)))
                .collect()
        })
        .collect();
    LabFlagScreen {
        flags: LAB_FLAG_RULES.iter().map(|r| r.flag.to_string()).collect(),
        rows,
    }
}

/// Write the lab flag columns from the current (imputed) lab values.
///
/// Lab columns absent from the frame are materialised as 0 first.
pub fn assign_lab_flags(frame: &mut FeatureFrame) -> Result<(), PipelineError> {
    for field in flagged_lab_fields() {
        frame.ensure_column(field, Value::Number(0.0));
    }
    for rule in &LAB_FLAG_RULES {
        let values: Vec<Value> = (0..frame.n_rows())
            .map(|row| Value::Number(f64::from(rule.evaluate(lab_value(frame, row, rule.field)))))
            .collect();
        frame.put_column(rule.flag, values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(columns: &[&str], rows: Vec<Vec<Value>>) -> FeatureFrame {
        FeatureFrame::from_rows(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn rule(flag: &str) -> &'static LabFlagRule {
        LAB_FLAG_RULES.iter().find(|r| r.flag == flag).unwrap()
    }

    fn audiogram_frame(side: Value, left: f64, right: f64) -> FeatureFrame {
        let mut columns = vec!["Side".to_string()];
        let mut row = vec![side];
        for f in FREQUENCIES {
            columns.push(pta_column(Ear::Left, f));
            row.push(Value::Number(left));
            columns.push(pta_column(Ear::Right, f));
            row.push(Value::Number(right));
        }
        FeatureFrame::from_rows(columns, vec![row]).unwrap()
    }

    #[test]
    fn test_event_columns() {
        let mut f = frame(
            &["Side"],
            vec![
                vec![Value::Number(1.0)],
                vec![Value::Number(2.0)],
                vec![Value::Null],
                vec![Value::from("Left")],
            ],
        );
        assign_event_columns(&mut f).unwrap();

        let lt: Vec<f64> = f.column(LT_EVENT_COLUMN).unwrap().iter().map(|v| v.as_f64().unwrap()).collect();
        let rt: Vec<f64> = f.column(RT_EVENT_COLUMN).unwrap().iter().map(|v| v.as_f64().unwrap()).collect();
        assert_eq!(lt, vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(rt, vec![1.0, 0.0, 0.0, 0.0]);

        let side: Vec<Value> = f.column("Side").unwrap().into_iter().cloned().collect();
        assert_eq!(
            side,
            vec![Value::Number(1.0), Value::Number(2.0), Value::Null, Value::Number(2.0)]
        );
    }

    #[test]
    fn test_event_columns_need_side() {
        let mut f = frame(&["Age"], vec![vec![Value::Number(40.0)]]);
        assign_event_columns(&mut f).unwrap();
        assert!(!f.has_column(LT_EVENT_COLUMN));
    }

    #[test]
    fn test_side_assignment_is_mutually_exclusive() {
        for (side, affected, normal) in [(1.0, 70.0, 20.0), (2.0, 20.0, 70.0)] {
            // left ear reads 20, right ear reads 70
            let mut f = audiogram_frame(Value::Number(side), 20.0, 70.0);
            FeatureDeriver::derive(&mut f).unwrap();
            for freq in FREQUENCIES {
                let a = f.get(0, &affected_column(freq)).unwrap().as_f64().unwrap();
                let n = f.get(0, &normal_column(freq)).unwrap().as_f64().unwrap();
                assert_eq!((a, n), (affected, normal), "side {side} at {freq} Hz");
            }
        }
    }

    #[test]
    fn test_missing_selected_threshold_stays_missing() {
        let mut f = audiogram_frame(Value::Number(1.0), 30.0, 60.0);
        let idx = f.column_index("PTA_RT_AC_500").unwrap();
        f.set(0, idx, Value::Null);
        FeatureDeriver::derive(&mut f).unwrap();

        assert_eq!(f.get(0, "affected_side_500"), Some(&Value::Null));
        assert_eq!(f.get(0, "normal_side_500"), Some(&Value::Number(30.0)));
        assert_eq!(f.get(0, MEAN_AFFECTED_COLUMN), Some(&Value::Null));
        assert_eq!(f.get(0, HL_SEVERITY_COLUMN), Some(&Value::Null));
        assert_eq!(f.get(0, NORMAL_SEVERITY_COLUMN), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_severity_follows_imputed_thresholds() {
        let mut f = audiogram_frame(Value::Number(1.0), 30.0, 60.0);
        let idx = f.column_index("PTA_RT_AC_500").unwrap();
        f.set(0, idx, Value::Null);
        FeatureDeriver::derive(&mut f).unwrap();
        assert_eq!(f.get(0, HL_SEVERITY_COLUMN), Some(&Value::Null));

        let idx = f.column_index("affected_side_500").unwrap();
        f.set(0, idx, Value::Number(40.0));
        assign_imputed_severity(&mut f).unwrap();

        // (40 + 60 + 60 + 60) / 4
        assert_eq!(f.get(0, MEAN_AFFECTED_COLUMN), Some(&Value::Number(55.0)));
        assert_eq!(f.get(0, HL_SEVERITY_COLUMN), Some(&Value::Number(3.0)));
        assert_eq!(f.get(0, MEAN_NORMAL_COLUMN), Some(&Value::Number(30.0)));
        assert_eq!(f.get(0, NORMAL_SEVERITY_COLUMN), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_imputed_severity_needs_mean_column() {
        let mut f = frame(&["Age"], vec![vec![Value::Number(40.0)]]);
        assign_imputed_severity(&mut f).unwrap();
        assert_eq!(f.columns().to_vec(), vec!["Age".to_string()]);
    }

    #[test]
    fn test_unknown_side_fills_normal_only() {
        let mut f = audiogram_frame(Value::Null, 30.0, 60.0);
        FeatureDeriver::derive(&mut f).unwrap();
        assert_eq!(f.get(0, "affected_side_1000"), Some(&Value::Null));
        assert_eq!(f.get(0, "normal_side_1000"), Some(&Value::Number(30.0)));
    }

    #[test]
    fn test_thresholds_without_side_column_fail() {
        let mut f = frame(
            &["PTA_LT_AC_500", "PTA_RT_AC_500"],
            vec![vec![Value::Number(10.0), Value::Number(20.0)]],
        );
        let err = FeatureDeriver::derive(&mut f).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn(c) if c == LT_EVENT_COLUMN));
    }

    #[test]
    fn test_means_need_all_four_columns() {
        let mut f = frame(
            &["affected_side_500", "affected_side_1000", "affected_side_2000"],
            vec![vec![Value::Number(10.0), Value::Number(20.0), Value::Number(30.0)]],
        );
        assign_mean_columns(&mut f).unwrap();
        assert!(!f.has_column(MEAN_AFFECTED_COLUMN));

        assign_severity(&mut f, MEAN_AFFECTED_COLUMN, HL_SEVERITY_COLUMN).unwrap();
        assert_eq!(f.get(0, HL_SEVERITY_COLUMN), Some(&Value::Null));
    }

    #[test]
    fn test_mean_value() {
        let mut f = audiogram_frame(Value::Number(2.0), 45.0, 10.0);
        FeatureDeriver::derive(&mut f).unwrap();
        assert_eq!(f.get(0, MEAN_AFFECTED_COLUMN), Some(&Value::Number(45.0)));
        assert_eq!(f.get(0, HL_SEVERITY_COLUMN), Some(&Value::Number(3.0)));
        assert_eq!(f.get(0, MEAN_NORMAL_COLUMN), Some(&Value::Number(10.0)));
        assert_eq!(f.get(0, NORMAL_SEVERITY_COLUMN), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_severity_band_boundaries() {
        assert_eq!(severity_band(Some(25.0)), Some(1));
        assert_eq!(severity_band(Some(25.1)), Some(2));
        assert_eq!(severity_band(Some(40.0)), Some(2));
        assert_eq!(severity_band(Some(60.0)), Some(3));
        assert_eq!(severity_band(Some(80.0)), Some(4));
        assert_eq!(severity_band(Some(80.1)), Some(5));
        assert_eq!(severity_band(Some(-5.0)), Some(1));
        assert_eq!(severity_band(None), None);
        assert_eq!(severity_band(Some(f64::NAN)), None);
    }

    #[test]
    fn test_flag_threshold_exactness() {
        assert_eq!(rule("Hyper_AST").evaluate(Some(39.9)), 0);
        assert_eq!(rule("Hyper_AST").evaluate(Some(40.0)), 1);
        assert_eq!(rule("Hyper_natremia").evaluate(Some(135.0)), 1);
        assert_eq!(rule("Hypo_natremia").evaluate(Some(135.0)), 0);
        assert_eq!(rule("Hypo_natremia").evaluate(Some(145.0)), 1);
        assert_eq!(rule("Hyper_Cr").evaluate(Some(1.3)), 0);
        assert_eq!(rule("Hypo_K").evaluate(Some(3.5)), 0);
        assert_eq!(rule("Hypo_Glucose").evaluate(Some(80.0)), 1);
        assert_eq!(rule("Hyper_AST").evaluate(None), 0);
    }

    #[test]
    fn test_flag_rules_cover_eleven_fields() {
        assert_eq!(flagged_lab_fields().len(), 11);
        assert!(!LAB_FLAG_RULES.iter().any(|r| r.flag == "Hyper_K"));
    }

    #[test]
    fn test_screen_leaves_nulls_unflagged() {
        let f = frame(&["AST", "K"], vec![vec![Value::Null, Value::Number(4.0)]]);
        let screen = screen_lab_flags(&f);

        assert_eq!(screen.value(0, "Hyper_AST"), Some(0));
        assert_eq!(screen.value(0, "Hypo_K"), Some(0));
        // absent Hb column reads as 0
        assert_eq!(screen.value(0, "Hypo_Hb"), Some(1));
        assert_eq!(f.get(0, "AST"), Some(&Value::Null));
        assert!(!f.has_column("Hb"));
    }

    #[test]
    fn test_assign_lab_flags_materialises_absent_labs() {
        let mut f = frame(&["AST"], vec![vec![Value::Number(55.0)]]);
        assign_lab_flags(&mut f).unwrap();

        assert_eq!(f.get(0, "Hyper_AST"), Some(&Value::Number(1.0)));
        assert_eq!(f.get(0, "K"), Some(&Value::Number(0.0)));
        assert_eq!(f.get(0, "Hypo_K"), Some(&Value::Number(1.0)));
        assert_eq!(f.get(0, "Hyper_PLT"), Some(&Value::Number(0.0)));
    }
}
