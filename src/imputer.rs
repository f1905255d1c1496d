//! Iterative multivariate imputation
//!
//! Each column with missing cells is modelled as a ridge regression on every
//! other column, visiting the columns round-robin until the imputed values
//! stop moving. Columns with no observed value in the fitted batch are filled
//! with 0; on a one-row batch that is the fate of every missing cell, since no
//! cross-column relationship can be learned from a single observation.

use crate::error::PipelineError;
use crate::schema::{FeatureFrame, Value};
use faer::prelude::SpSolver;
use faer::{Mat, Side};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Default number of imputation rounds
pub const DEFAULT_MAX_ITER: usize = 10;
/// Default convergence tolerance, relative to the largest observed magnitude
pub const DEFAULT_TOL: f64 = 1e-3;
/// Default seed for the random visiting order
pub const DEFAULT_RANDOM_SEED: u64 = 42;
/// Default ridge penalty
pub const DEFAULT_RIDGE_ALPHA: f64 = 1.0;

/// Fill value for columns with no observed cell
const EMPTY_FEATURE_FILL: f64 = 0.0;

/// Order in which columns are visited within a round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationOrder {
    /// Fewest missing values first
    #[default]
    Ascending,
    /// Most missing values first
    Descending,
    /// Left to right
    Roman,
    /// Right to left
    Arabic,
    /// Seeded permutation
    Random,
}

/// Imputer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputerConfig {
    pub max_iter: usize,
    pub tol: f64,
    pub random_seed: u64,
    pub order: ImputationOrder,
    pub ridge_alpha: f64,
}

impl Default for ImputerConfig {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            tol: DEFAULT_TOL,
            random_seed: DEFAULT_RANDOM_SEED,
            order: ImputationOrder::default(),
            ridge_alpha: DEFAULT_RIDGE_ALPHA,
        }
    }
}

/// Ridge regression with intercept
#[derive(Debug, Clone)]
struct RidgeModel {
    coef: Array1<f64>,
    intercept: f64,
}

impl RidgeModel {
    fn fit(x: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> Option<Self> {
        let (n, p) = x.dim();
        let y_mean = y.mean()?;
        if p == 0 {
            return Some(Self {
                coef: Array1::zeros(0),
                intercept: y_mean,
            });
        }

        let x_mean = x.mean_axis(Axis(0))?;
        let xc = x - &x_mean;
        let yc = y - y_mean;

        // primal system when there are at least as many rows as predictors,
        // kernel (dual) system otherwise
        let coef = if n >= p {
            let mut gram = xc.t().dot(&xc);
            for i in 0..p {
                gram[[i, i]] += alpha;
            }
            solve_spd(gram, xc.t().dot(&yc))?
        } else {
            let mut kernel = xc.dot(&xc.t());
            for i in 0..n {
                kernel[[i, i]] += alpha;
            }
            let dual = solve_spd(kernel, yc)?;
            xc.t().dot(&dual)
        };

        let intercept = y_mean - x_mean.dot(&coef);
        Some(Self { coef, intercept })
    }

    fn predict(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept + row.dot(&self.coef)
    }
}

/// Solve `a x = b` for symmetric positive definite `a` by Cholesky factorisation.
///
/// `None` when `a` is not positive definite or the solution is not finite.
fn solve_spd(a: Array2<f64>, b: Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let lhs = Mat::<f64>::from_fn(n, n, |i, j| a[[i, j]]);
    let rhs = Mat::<f64>::from_fn(n, 1, |i, _| b[i]);

    let chol = lhs.cholesky(Side::Lower).ok()?;
    let solution = chol.solve(&rhs);
    let x: Array1<f64> = (0..n).map(|i| solution[(i, 0)]).collect();
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// One fitted regression of the imputation sequence
#[derive(Debug, Clone)]
struct ImputationStep {
    feature: usize,
    predictors: Vec<usize>,
    model: RidgeModel,
}

/// Round-robin iterative imputer
#[derive(Debug, Clone, Default)]
pub struct IterativeImputer {
    config: ImputerConfig,
}

/// Imputer fitted on a reference batch
#[derive(Debug, Clone)]
pub struct FittedImputer {
    columns: Vec<String>,
    initial: Vec<f64>,
    sequence: Vec<ImputationStep>,
    /// Rounds run during fitting
    pub n_iter: usize,
    /// Whether the change between the last two rounds fell below tolerance
    pub converged: bool,
}

impl IterativeImputer {
    pub fn new(config: ImputerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImputerConfig {
        &self.config
    }

    /// Fit on `frame` and return it with every missing cell imputed
    pub fn fit_transform(&self, frame: &FeatureFrame) -> Result<FeatureFrame, PipelineError> {
        let (_, imputed) = self.fit_inner(frame)?;
        Ok(imputed)
    }

    /// Fit on a reference batch, for imputing other batches later
    pub fn fit(&self, frame: &FeatureFrame) -> Result<FittedImputer, PipelineError> {
        let (fitted, _) = self.fit_inner(frame)?;
        Ok(fitted)
    }

    fn fit_inner(&self, frame: &FeatureFrame) -> Result<(FittedImputer, FeatureFrame), PipelineError> {
        if !(self.config.ridge_alpha >= 0.0) || !(self.config.tol >= 0.0) {
            return Err(imputation_error(
                frame,
                format!(
                    "invalid configuration: ridge_alpha={}, tol={}",
                    self.config.ridge_alpha, self.config.tol
                ),
            ));
        }

        let x = frame_to_matrix(frame)?;
        let (n_rows, n_cols) = x.dim();
        tracing::debug!(rows = n_rows, columns = n_cols, "fitting iterative imputer");

        let missing: Vec<Vec<usize>> = (0..n_cols)
            .map(|j| (0..n_rows).filter(|&i| x[[i, j]].is_nan()).collect())
            .collect();
        let valid: Vec<usize> = (0..n_cols).filter(|&j| missing[j].len() < n_rows).collect();

        let initial: Vec<f64> = (0..n_cols)
            .map(|j| {
                let observed: Vec<f64> = x.column(j).iter().copied().filter(|v| !v.is_nan()).collect();
                if observed.is_empty() {
                    EMPTY_FEATURE_FILL
                } else {
                    observed.iter().sum::<f64>() / observed.len() as f64
                }
            })
            .collect();

        let mut xt = x.clone();
        for j in 0..n_cols {
            for &i in &missing[j] {
                xt[[i, j]] = initial[j];
            }
        }

        let mut fitted = FittedImputer {
            columns: frame.columns().to_vec(),
            initial,
            sequence: Vec::new(),
            n_iter: 0,
            converged: true,
        };

        let any_missing = valid.iter().any(|&j| !missing[j].is_empty());
        if n_rows == 0 || !any_missing || self.config.max_iter == 0 {
            return Ok((fitted, matrix_to_frame(frame, &xt)?));
        }

        let order = self.visiting_order(&valid, &missing);
        let scale = x
            .iter()
            .filter(|v| !v.is_nan())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let normalized_tol = self.config.tol * scale;

        fitted.converged = false;
        for round in 0..self.config.max_iter {
            let previous = xt.clone();
            for &feature in &order {
                let predictors: Vec<usize> = valid.iter().copied().filter(|&j| j != feature).collect();
                let train_rows: Vec<usize> = (0..n_rows).filter(|&i| !x[[i, feature]].is_nan()).collect();

                let x_train = xt.select(Axis(0), &train_rows).select(Axis(1), &predictors);
                let y_train: Array1<f64> = train_rows.iter().map(|&i| x[[i, feature]]).collect();
                let model = RidgeModel::fit(&x_train, &y_train, self.config.ridge_alpha).ok_or_else(|| {
                    imputation_error(
                        frame,
                        format!(
                            "regression for column {} is singular",
                            frame.columns()[feature]
                        ),
                    )
                })?;

                for &i in &missing[feature] {
                    let row: Array1<f64> = predictors.iter().map(|&j| xt[[i, j]]).collect();
                    xt[[i, feature]] = finite_estimate(frame, feature, model.predict(row.view()))?;
                }

                fitted.sequence.push(ImputationStep {
                    feature,
                    predictors,
                    model,
                });
            }

            fitted.n_iter = round + 1;
            let change = (&xt - &previous)
                .iter()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()));
            tracing::debug!(round = round + 1, change, tolerance = normalized_tol, "imputation round");
            if change < normalized_tol {
                fitted.converged = true;
                break;
            }
        }

        if !fitted.converged {
            tracing::warn!(
                max_iter = self.config.max_iter,
                "iterative imputer stopped before reaching tolerance"
            );
        }

        let imputed = matrix_to_frame(frame, &xt)?;
        Ok((fitted, imputed))
    }

    fn visiting_order(&self, valid: &[usize], missing: &[Vec<usize>]) -> Vec<usize> {
        let mut order = valid.to_vec();
        match self.config.order {
            ImputationOrder::Roman => {}
            ImputationOrder::Arabic => order.reverse(),
            ImputationOrder::Ascending => order.sort_by_key(|&j| missing[j].len()),
            ImputationOrder::Descending => {
                order.sort_by_key(|&j| std::cmp::Reverse(missing[j].len()))
            }
            ImputationOrder::Random => {
                let mut rng = StdRng::seed_from_u64(self.config.random_seed);
                order.shuffle(&mut rng);
            }
        }
        order
    }
}

impl FittedImputer {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Impute a batch with the columns this imputer was fitted on
    pub fn transform(&self, frame: &FeatureFrame) -> Result<FeatureFrame, PipelineError> {
        if frame.columns() != self.columns.as_slice() {
            return Err(imputation_error(
                frame,
                format!("expected columns [{}]", self.columns.join(", ")),
            ));
        }

        let x = frame_to_matrix(frame)?;
        let mut xt = x.clone();
        for ((i, j), v) in x.indexed_iter() {
            if v.is_nan() {
                xt[[i, j]] = self.initial[j];
            }
        }

        for step in &self.sequence {
            for i in 0..x.nrows() {
                if x[[i, step.feature]].is_nan() {
                    let row: Array1<f64> = step.predictors.iter().map(|&j| xt[[i, j]]).collect();
                    let value = step.model.predict(row.view());
                    xt[[i, step.feature]] = finite_estimate(frame, step.feature, value)?;
                }
            }
        }

        matrix_to_frame(frame, &xt)
    }
}

/// Reject NaN or infinite regression estimates
fn finite_estimate(frame: &FeatureFrame, feature: usize, value: f64) -> Result<f64, PipelineError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(imputation_error(
            frame,
            format!("non-finite estimate for column {}", frame.columns()[feature]),
        ))
    }
}

fn imputation_error(frame: &FeatureFrame, message: String) -> PipelineError {
    PipelineError::Imputation {
        message,
        columns: frame.column_list(),
        preview: frame.preview(5),
    }
}

/// Numeric matrix of a frame; null and blank cells become NaN
fn frame_to_matrix(frame: &FeatureFrame) -> Result<Array2<f64>, PipelineError> {
    let mut x = Array2::<f64>::zeros((frame.n_rows(), frame.n_cols()));
    for (i, row) in frame.rows().iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            x[[i, j]] = match cell {
                Value::Null => f64::NAN,
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::Number(n) if n.is_nan() => f64::NAN,
                Value::Number(n) if n.is_finite() => *n,
                Value::Text(s) if s.trim().is_empty() => f64::NAN,
                other => {
                    return Err(imputation_error(
                        frame,
                        format!(
                            "column {} holds non-numeric value {other}",
                            frame.columns()[j]
                        ),
                    ))
                }
            };
        }
    }
    Ok(x)
}

fn matrix_to_frame(template: &FeatureFrame, x: &Array2<f64>) -> Result<FeatureFrame, PipelineError> {
    let rows = x
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|v| Value::Number(*v)).collect())
        .collect();
    FeatureFrame::from_rows(template.columns().to_vec(), rows)
}
