//! Pipeline orchestration
//!
//! This module provides the public API of the crate. It runs raw patient
//! records through normalization, imputation and finalization, and the
//! [`Predictor`] feeds the finalized batch to a hospital's two models.

use crate::artifacts::{load_accuracy, load_scaler, ArtifactStore, DEFAULT_ACCURACY};
use crate::config::PipelineConfig;
use crate::error::{ModelError, PipelineError};
use crate::hospital::{Hospital, HospitalProfile, ModelKind};
use crate::imputer::IterativeImputer;
use crate::finalizer::Finalizer;
use crate::model::{recovery_probabilities, Classifier, Scaler};
use crate::normalizer::Normalizer;
use crate::schema::{FeatureFrame, PatientRecord, RecordAdapter};
use crate::types::{FeatureMatrix, FinalizedBatch, ModelPrediction, PredictionOutcome};
use std::sync::Arc;

/// Preprocess a JSON array of patient records into a finalized batch.
///
/// # Example
/// ```ignore
/// let batch = preprocess_json(r#"[{"ID": 12345, "Side": 1}]"#, &PipelineConfig::default())?;
/// assert_eq!(batch.columns.len(), 74);
/// ```
pub fn preprocess_json(raw_json: &str, config: &PipelineConfig) -> Result<FinalizedBatch, PipelineError> {
    let frame = RecordAdapter::frame_from_array(raw_json)?;
    FeaturePipeline::new(config.clone()).run(frame)
}

/// Preprocess typed patient records into a finalized batch
pub fn preprocess_records(
    records: &[PatientRecord],
    config: &PipelineConfig,
) -> Result<FinalizedBatch, PipelineError> {
    let frame = PatientRecord::to_frame(records)?;
    FeaturePipeline::new(config.clone()).run(frame)
}

/// The preprocessing stages, configured once and run per request.
///
/// Pipeline stages:
/// 1. Normalizer - first encounter, age, encodings, derived features
/// 2. IterativeImputer - fill missing cells
/// 3. Finalizer - trained schema, lab flags, numeric coercion
#[derive(Debug, Clone, Default)]
pub struct FeaturePipeline {
    config: PipelineConfig,
}

impl FeaturePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, frame: FeatureFrame) -> Result<FinalizedBatch, PipelineError> {
        let normalized = Normalizer::normalize(frame)?;

        let imputer = IterativeImputer::new(self.config.imputer.clone());
        let imputed = imputer.fit_transform(&normalized.frame).map_err(|e| {
            tracing::error!(
                error = %e,
                rows = %normalized.frame.preview(self.config.preview_rows),
                "imputation failed"
            );
            e
        })?;

        let batch = Finalizer::finalize(&imputed, normalized.identifiers, normalized.lab_screen)?;
        tracing::info!(rows = batch.n_rows(), "preprocessed patient batch");
        Ok(batch)
    }
}

/// Recovery predictor for one hospital.
///
/// Models and scaler are shared, read-only artifacts; a predictor holds no
/// mutable state and may serve concurrent requests.
pub struct Predictor {
    profile: HospitalProfile,
    pipeline: FeaturePipeline,
    lgbm: Option<Arc<dyn Classifier>>,
    xgb: Option<Arc<dyn Classifier>>,
    scaler: Option<Arc<dyn Scaler>>,
    lgbm_accuracy: f64,
    xgb_accuracy: f64,
}

impl Predictor {
    /// Create a predictor with no artifacts
    pub fn new(profile: HospitalProfile) -> Self {
        Self {
            profile,
            pipeline: FeaturePipeline::default(),
            lgbm: None,
            xgb: None,
            scaler: None,
            lgbm_accuracy: DEFAULT_ACCURACY,
            xgb_accuracy: DEFAULT_ACCURACY,
        }
    }

    /// Create a predictor with scaler and accuracies read from an artifact store
    pub fn from_store(
        hospital: Hospital,
        store: &dyn ArtifactStore,
        lgbm: Arc<dyn Classifier>,
        xgb: Arc<dyn Classifier>,
    ) -> Self {
        let scaler = load_scaler(store, hospital).map(|s| Arc::new(s) as Arc<dyn Scaler>);
        Self::new(hospital.profile())
            .with_models(lgbm, xgb)
            .with_scaler(scaler)
            .with_accuracies(
                load_accuracy(store, hospital, ModelKind::Lgbm),
                load_accuracy(store, hospital, ModelKind::Xgb),
            )
    }

    pub fn with_models(mut self, lgbm: Arc<dyn Classifier>, xgb: Arc<dyn Classifier>) -> Self {
        self.lgbm = Some(lgbm);
        self.xgb = Some(xgb);
        self
    }

    pub fn with_scaler(mut self, scaler: Option<Arc<dyn Scaler>>) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn with_accuracies(mut self, lgbm: f64, xgb: f64) -> Self {
        self.lgbm_accuracy = lgbm;
        self.xgb_accuracy = xgb;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline = FeaturePipeline::new(config);
        self
    }

    pub fn profile(&self) -> &HospitalProfile {
        &self.profile
    }

    /// Predict recovery, returning the empty outcome on any failure
    pub fn predict_outcome(&self, frame: FeatureFrame) -> PredictionOutcome {
        match self.try_predict(frame) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    hospital = %self.profile.hospital,
                    error = ?e,
                    "prediction failed: {e}"
                );
                PredictionOutcome::empty(self.profile.hospital.key())
            }
        }
    }

    /// Predict recovery for typed records, returning the empty outcome on failure
    pub fn predict_records(&self, records: &[PatientRecord]) -> PredictionOutcome {
        match PatientRecord::to_frame(records) {
            Ok(frame) => self.predict_outcome(frame),
            Err(e) => {
                tracing::error!(hospital = %self.profile.hospital, error = %e, "prediction failed");
                PredictionOutcome::empty(self.profile.hospital.key())
            }
        }
    }

    /// Predict recovery, propagating failures
    pub fn try_predict(&self, frame: FeatureFrame) -> Result<PredictionOutcome, PipelineError> {
        let (lgbm, xgb) = match (&self.lgbm, &self.xgb) {
            (Some(lgbm), Some(xgb)) => (lgbm, xgb),
            _ => {
                return Err(PipelineError::ModelNotLoaded(format!(
                    "{} needs both an lgbm and an xgb model",
                    self.profile.hospital
                )))
            }
        };

        let batch = self.pipeline.run(frame)?;
        let features = self.scale(batch.to_matrix())?;

        let a = run_model(lgbm.as_ref(), &features, self.lgbm_accuracy)?;
        let b = run_model(xgb.as_ref(), &features, self.xgb_accuracy)?;
        tracing::info!(
            hospital = %self.profile.hospital,
            rows = features.n_rows(),
            "predicted recovery"
        );

        Ok(PredictionOutcome::from_predictions(
            self.profile.hospital.key(),
            a,
            b,
            batch.identifiers,
        ))
    }

    /// Apply the scaler to the profile's continuous columns
    fn scale(&self, mut features: FeatureMatrix) -> Result<FeatureMatrix, PipelineError> {
        let Some(scaler) = &self.scaler else {
            if self.profile.uses_scaler {
                tracing::warn!(
                    hospital = %self.profile.hospital,
                    "no scaler loaded, continuous features stay unscaled"
                );
            }
            return Ok(features);
        };
        let continuous = features.reindex(&self.profile.continuous_columns);
        let scaled = scaler.transform(&continuous)?;
        if scaled.columns != continuous.columns || scaled.n_rows() != continuous.n_rows() {
            return Err(ModelError::FeatureMismatch {
                expected: continuous.columns.len(),
                actual: scaled.columns.len(),
            }
            .into());
        }
        features.update(&scaled);
        Ok(features)
    }
}

fn run_model(
    model: &dyn Classifier,
    features: &FeatureMatrix,
    accuracy: f64,
) -> Result<ModelPrediction, PipelineError> {
    let input = features.reindex(model.feature_names());
    let n_rows = input.n_rows();

    let labels = model.predict(&input)?;
    if labels.len() != n_rows {
        return Err(ModelError::RowMismatch {
            expected: n_rows,
            actual: labels.len(),
        }
        .into());
    }
    let probabilities = model.predict_proba(&input)?;
    let recovery = recovery_probabilities(&probabilities, n_rows)?;

    Ok(ModelPrediction {
        model: model.name().to_string(),
        labels,
        recovery_probabilities: recovery,
        accuracy,
        features: input,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StandardScaler;
    use crate::schema::FINAL_COLUMNS;
    use pretty_assertions::assert_eq;

    /// Classifier returning a fixed P(class 1) for every row
    struct FixedClassifier {
        name: String,
        features: Vec<String>,
        p_class1: f64,
    }

    impl FixedClassifier {
        fn new(name: &str, features: &[&str], p_class1: f64) -> Arc<dyn Classifier> {
            Arc::new(Self {
                name: name.to_string(),
                features: features.iter().map(|f| f.to_string()).collect(),
                p_class1,
            })
        }
    }

    impl Classifier for FixedClassifier {
        fn name(&self) -> &str {
            &self.name
        }

        fn feature_names(&self) -> &[String] {
            &self.features
        }

        fn predict(&self, features: &FeatureMatrix) -> Result<Vec<i64>, ModelError> {
            Ok(vec![i64::from(self.p_class1 >= 0.5); features.n_rows()])
        }

        fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
            Ok(vec![vec![1.0 - self.p_class1, self.p_class1]; features.n_rows()])
        }
    }

    /// Classifier whose probability call always fails
    struct BrokenClassifier(Vec<String>);

    impl Classifier for BrokenClassifier {
        fn name(&self) -> &str {
            "broken"
        }

        fn feature_names(&self) -> &[String] {
            &self.0
        }

        fn predict(&self, features: &FeatureMatrix) -> Result<Vec<i64>, ModelError> {
            Ok(vec![0; features.n_rows()])
        }

        fn predict_proba(&self, _: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
            Err(ModelError::Inference("tree ensemble unavailable".into()))
        }
    }

    fn make_test_frame_json() -> String {
        r#"[{
                "ID": 123456, "Birth": "1970-01-01", "test_date": "2024-03-02",
                "Sex": 2, "Side": "Right", "HL_duration": 3, "Steroid": 1, "IT_dexa": 0, "HBOT": 0,
                "PTA_LT_AC_250": 20, "PTA_RT_AC_250": 60,
                "PTA_LT_AC_500": 30, "PTA_RT_AC_500": null,
                "PTA_LT_AC_1000": 25, "PTA_RT_AC_1000": 70,
                "PTA_LT_AC_2000": 20, "PTA_RT_AC_2000": 75,
                "PTA_LT_AC_3000": 25, "PTA_RT_AC_3000": 80,
                "PTA_LT_AC_4000": 30, "PTA_RT_AC_4000": 85,
                "PTA_LT_AC_8000": 35, "PTA_RT_AC_8000": 90,
                "WBC": 6.0, "RBC": 4.5, "Hb": 14.0, "PLT": 250, "Neutrophil": 60,
                "Lymphocyte": 30, "AST": 20, "ALT": 20, "BUN": 12, "Cr": 0.8,
                "Glucose": 100, "Total_Protein": 7.0, "Na": 140, "K": 4.0, "Cl": 100,
                "Dx_COM": 0, "Dx_SSNHL": 1, "Dx_Dizziness": 0, "Dx_Tinnitus": 1,
                "Hx_HTN": 0, "Hx_DM": 0, "Hx_CRF": 0, "Hx_MI": 0, "Hx_stroke": 0,
                "Hx_cancer": 0, "Hx_others": 0
            }]"#
        .to_string()
    }

    fn make_test_frame() -> FeatureFrame {
        RecordAdapter::frame_from_array(&make_test_frame_json()).unwrap()
    }

    fn make_test_predictor(profile: HospitalProfile) -> Predictor {
        Predictor::new(profile)
            .with_models(
                FixedClassifier::new("lgbm", &["HL_severity", "Age", "affected_side_500"], 0.3),
                FixedClassifier::new("xgb", &["Sex_2.0", "unknown_feature"], 0.8),
            )
            .with_accuracies(0.85, 0.8)
    }

    #[test]
    fn test_end_to_end_batch() {
        let batch = FeaturePipeline::default().run(make_test_frame()).unwrap();

        assert_eq!(batch.identifiers, vec!["00123456"]);
        assert_eq!(batch.column_names(), FINAL_COLUMNS.to_vec());
        assert!(batch.rows[0].iter().all(|v| v.is_finite()));
        assert_eq!(batch.value(0, "normal_side_500"), Some(30.0));
        assert_eq!(batch.value(0, "affected_side_1000"), Some(70.0));
        assert_eq!(batch.value(0, "Age"), Some(54.0));
        assert_eq!(batch.value(0, "Sex_2.0"), Some(1.0));
        assert_eq!(batch.value(0, "HL_type_irregular"), Some(1.0));
        // one-row batch: the missing threshold has nothing to learn from
        assert_eq!(batch.value(0, "affected_side_500"), Some(0.0));
        // severity follows the imputed affected-side mean, (0 + 70 + 75 + 85) / 4
        assert_eq!(batch.value(0, "mean_affected_four"), Some(57.5));
        assert_eq!(batch.value(0, "HL_severity"), Some(3.0));
        assert_eq!(batch.value(0, "mean_normal_four"), Some(26.25));
        assert_eq!(batch.value(0, "Normal_severity"), Some(2.0));

        for column in FINAL_COLUMNS.iter().filter(|c| c.starts_with("Hyp")) {
            assert_eq!(batch.value(0, column), Some(0.0), "{column}");
        }
    }

    #[test]
    fn test_side_labels_in_raw_frames() {
        let coded = make_test_frame_json().replace("\"Right\"", "1");
        let from_label = preprocess_json(&make_test_frame_json(), &PipelineConfig::default()).unwrap();
        let from_code = preprocess_json(&coded, &PipelineConfig::default()).unwrap();
        assert_eq!(from_label.rows, from_code.rows);

        let outcome = make_test_predictor(Hospital::All.profile()).predict_outcome(make_test_frame());
        assert!(!outcome.is_empty());
    }

    #[test]
    fn test_preprocessing_is_idempotent() {
        let first = FeaturePipeline::default().run(make_test_frame()).unwrap();
        let second = FeaturePipeline::default().run(make_test_frame()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_recovery_probability_is_inverted() {
        let predictor = make_test_predictor(Hospital::All.profile());
        let outcome = predictor.try_predict(make_test_frame()).unwrap();

        let prob_a = outcome.prob_a.as_ref().unwrap()[0];
        assert!((prob_a - 0.7).abs() < 1e-12);
        let prob_b = outcome.prob_b.as_ref().unwrap()[0];
        assert!((prob_b - 0.2).abs() < 1e-12);
        assert_eq!(outcome.label_a, Some(vec![0]));
        assert_eq!(outcome.label_b, Some(vec![1]));
        assert_eq!(outcome.identifiers, Some(vec!["00123456".to_string()]));
        assert_eq!(outcome.accuracy_a, Some(0.85));
    }

    #[test]
    fn test_model_inputs_follow_model_feature_order() {
        let predictor = make_test_predictor(Hospital::All.profile());
        let outcome = predictor.try_predict(make_test_frame()).unwrap();

        let a = outcome.features_a.unwrap();
        assert_eq!(a.columns, vec!["HL_severity", "Age", "affected_side_500"]);
        assert_eq!(a.rows, vec![vec![3.0, 54.0, 0.0]]);

        let b = outcome.features_b.unwrap();
        assert_eq!(b.columns, vec!["Sex_2.0", "unknown_feature"]);
        assert_eq!(b.rows, vec![vec![1.0, 0.0]]);
    }

    #[test]
    fn test_scaler_applies_to_continuous_columns() {
        let columns = Hospital::Hallym.profile().continuous_columns;
        let mut mean = vec![0.0; columns.len()];
        let mut scale = vec![1.0; columns.len()];
        let age = columns.iter().position(|c| c == "Age").unwrap();
        mean[age] = 50.0;
        scale[age] = 2.0;
        let scaler: Arc<dyn Scaler> = Arc::new(StandardScaler::new(columns, mean, scale).unwrap());

        let predictor = make_test_predictor(Hospital::Hallym.profile()).with_scaler(Some(scaler));
        let outcome = predictor.try_predict(make_test_frame()).unwrap();

        let a = outcome.features_a.unwrap();
        assert_eq!(a.rows[0][1], 2.0);
        // binary columns are not scaled
        assert_eq!(outcome.features_b.unwrap().rows[0][0], 1.0);
    }

    #[test]
    fn test_missing_scaler_leaves_features_unscaled() {
        let predictor = make_test_predictor(Hospital::Hallym.profile());
        let outcome = predictor.predict_outcome(make_test_frame());
        assert_eq!(outcome.features_a.unwrap().rows[0][1], 54.0);
    }

    #[test]
    fn test_missing_model_gives_empty_outcome() {
        let predictor = Predictor::new(Hospital::Jeju.profile());
        assert!(matches!(
            predictor.try_predict(make_test_frame()),
            Err(PipelineError::ModelNotLoaded(_))
        ));

        let outcome = predictor.predict_outcome(make_test_frame());
        assert!(outcome.is_empty());
        assert_eq!(outcome.prob_a, None);
        assert_eq!(outcome.features_b, None);
        assert_eq!(outcome.identifiers, None);
        assert_eq!(outcome.accuracy_a, None);
        assert_eq!(outcome.hospital, "jeju");
    }

    #[test]
    fn test_model_failure_gives_empty_outcome() {
        let broken: Arc<dyn Classifier> = Arc::new(BrokenClassifier(vec!["Age".into()]));
        let predictor = make_test_predictor(Hospital::Sev.profile())
            .with_models(broken, FixedClassifier::new("xgb", &["Age"], 0.5));
        assert!(predictor.predict_outcome(make_test_frame()).is_empty());
    }

    #[test]
    fn test_pipeline_failure_gives_empty_outcome() {
        let predictor = make_test_predictor(Hospital::All.profile());
        let frame = RecordAdapter::frame_from_array(r#"[{"ID": 1, "WBC": "high"}]"#).unwrap();
        assert!(predictor.predict_outcome(frame).is_empty());
    }

    #[test]
    fn test_predictor_from_store() {
        let mut store = crate::artifacts::MemoryStore::new();
        store.insert("txt/wonju_lgbm_accuracy.txt", "accuracy 0.88");

        let predictor = Predictor::from_store(
            Hospital::Wonju,
            &store,
            FixedClassifier::new("lgbm", &["Age"], 0.1),
            FixedClassifier::new("xgb", &["Age"], 0.1),
        );
        let outcome = predictor.predict_outcome(make_test_frame());
        assert_eq!(outcome.accuracy_a, Some(0.88));
        assert_eq!(outcome.accuracy_b, Some(DEFAULT_ACCURACY));
    }

    #[test]
    fn test_preprocess_json_and_records_agree() {
        let json = r#"[{"ID": 54321, "Side": "Left", "Sex": "Female", "PTA_LT_AC_500": 70, "PTA_RT_AC_500": 10}]"#;
        let from_json = preprocess_json(json, &PipelineConfig::default()).unwrap();
        let records = RecordAdapter::parse_array(json).unwrap();
        let from_records = preprocess_records(&records, &PipelineConfig::default()).unwrap();

        assert_eq!(from_json.value(0, "affected_side_500"), Some(70.0));
        assert_eq!(from_json.value(0, "normal_side_500"), Some(10.0));
        assert_eq!(from_json.value(0, "Sex_2.0"), Some(1.0));
        assert_eq!(from_records.value(0, "affected_side_500"), Some(70.0));
        assert_eq!(from_records.value(0, "normal_side_500"), Some(10.0));
        assert_eq!(from_records.value(0, "Sex_2.0"), Some(1.0));
        assert_eq!(from_json.identifiers, from_records.identifiers);
    }
}
