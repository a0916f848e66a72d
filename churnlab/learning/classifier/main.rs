//! Maximum-likelihood logistic regression (binomial family, logit link).

/// Maximum-likelihood fit and Wald standard errors.
pub(crate) mod mle;
/// Coefficient tables and fit summaries.
pub mod reporter;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ChurnError, DegenerateReason, Result},
    frame::{BinaryLevels, Class, Outcome},
    recipe::DesignMatrix,
};

pub use reporter::{render_terms, FitReport, Term};

/// Name of the intercept term.
pub const INTERCEPT: &str = "(Intercept)";

/// Default probability threshold for the positive class.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Logistic regression estimator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    max_iterations: usize,
    tolerance: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

impl LogisticRegression {
    /// Creates an estimator capped at 100 solver iterations with gradient tolerance 1e-8.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the solver iteration cap.
    #[must_use]
    pub const fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the gradient tolerance. A fit whose score norm exceeds
    /// `sqrt(tolerance) * rows` is reported as not converged.
    #[must_use]
    pub const fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Fits `outcome ~ all design columns` with an intercept.
    pub fn fit(&self, design: &DesignMatrix, outcome: &Outcome) -> Result<LogisticModel> {
        if design.nrows() != outcome.len() {
            return Err(ChurnError::InvalidConfig(format!(
                "design has {} rows, outcome has {}",
                design.nrows(),
                outcome.len()
            )));
        }
        let positives = outcome.count(Class::Positive);
        if positives == 0 || positives == outcome.len() {
            let class = match outcome.values.first() {
                Some(&class) => outcome.levels.label(class).to_owned(),
                None => String::new(),
            };
            return Err(ChurnError::degenerate(DegenerateReason::SingleClass { class }));
        }

        let n = design.nrows();
        let mut names = Vec::with_capacity(design.ncols() + 1);
        names.push(INTERCEPT.to_owned());
        names.extend(design.columns.iter().cloned());
        let positive: Array1<bool> = outcome
            .values
            .iter()
            .map(|&class| class == Class::Positive)
            .collect();

        let fit = mle::fit(
            design.values.view(),
            &positive,
            &names,
            self.max_iterations,
            self.tolerance,
        )?;

        let share = positives as f64 / n as f64;
        let null_deviance =
            -2.0 * n as f64 * share.mul_add(share.ln(), (1.0 - share) * (1.0 - share).ln());
        let terms = names
            .iter()
            .zip(fit.beta.iter())
            .zip(fit.std_errors.iter())
            .map(|((name, &estimate), &std_error)| Term::new(name, estimate, std_error))
            .collect();

        Ok(LogisticModel {
            columns: design.columns.clone(),
            intercept: fit.beta[0],
            coefficients: fit.beta.iter().skip(1).copied().collect(),
            terms,
            levels: outcome.levels.clone(),
            report: FitReport {
                model: "logistic_regression".into(),
                observations: n,
                max_iterations: self.max_iterations,
                score_norm: fit.score_norm,
                null_deviance,
                deviance: fit.deviance,
                aic: 2.0f64.mul_add(names.len() as f64, fit.deviance),
            },
        })
    }
}

/// Learned coefficients. Read-only after fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    columns: Vec<String>,
    intercept: f64,
    coefficients: Vec<f64>,
    terms: Vec<Term>,
    levels: BinaryLevels,
    report: FitReport,
}

/// Class and positive-class probability of one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scored {
    /// Predicted class.
    pub class: Class,
    /// Probability of the positive class.
    pub probability: f64,
}

impl LogisticModel {
    /// Design columns the model expects, in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Intercept on the log-odds scale.
    #[must_use]
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Slopes, aligned with [`Self::columns`].
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Coefficient table, intercept first.
    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Outcome labels the model was trained with.
    #[must_use]
    pub const fn levels(&self) -> &BinaryLevels {
        &self.levels
    }

    /// Fit diagnostics.
    #[must_use]
    pub const fn report(&self) -> &FitReport {
        &self.report
    }

    /// Positive-class probabilities for each design row.
    pub fn predict_proba(&self, design: &DesignMatrix) -> Result<Array1<f64>> {
        if design.columns != self.columns {
            return Err(ChurnError::InvalidConfig(format!(
                "design columns {:?} do not match model columns {:?}",
                design.columns, self.columns
            )));
        }
        let beta = Array1::from(self.coefficients.clone());
        let eta = design.values.dot(&beta) + self.intercept;
        Ok(eta.mapv(mle::logistic))
    }

    /// Probabilities and classes; positive iff `probability >= threshold`.
    pub fn predict(&self, design: &DesignMatrix, threshold: f64) -> Result<Vec<Scored>> {
        Ok(self
            .predict_proba(design)?
            .iter()
            .map(|&probability| Scored {
                class: Class::from_probability(probability, threshold),
                probability,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataloader::synthetic_customers, recipe::Recipe, splitter::stratified_split};
    use ndarray::{array, Array2};

    fn outcome(values: &[u8]) -> Outcome {
        Outcome {
            name: "churn".into(),
            levels: BinaryLevels::new("Yes", "No"),
            values: values
                .iter()
                .map(|&v| if v == 1 { Class::Positive } else { Class::Negative })
                .collect(),
        }
    }

    fn design(columns: &[&str], values: Array2<f64>) -> DesignMatrix {
        DesignMatrix {
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            values,
        }
    }

    #[test]
    fn binary_predictor_recovers_group_log_odds() {
        // x = 0: 1 of 4 positive, x = 1: 3 of 4 positive.
        let x = array![[0.0], [0.0], [0.0], [0.0], [1.0], [1.0], [1.0], [1.0]];
        let y = outcome(&[1, 0, 0, 0, 1, 1, 1, 0]);
        let model = LogisticRegression::new().fit(&design(&["x"], x), &y).unwrap();
        let third = (1.0_f64 / 3.0).ln();
        assert!((model.intercept() - third).abs() < 1e-6);
        assert!((model.coefficients()[0] - (3.0_f64.ln() - third)).abs() < 1e-6);

        let terms = model.terms();
        assert_eq!(terms[0].name, INTERCEPT);
        assert!((terms[0].std_error - (4.0_f64 / 3.0).sqrt()).abs() < 1e-4);
        assert!((terms[1].std_error - (8.0_f64 / 3.0).sqrt()).abs() < 1e-4);
        assert!(model.report().deviance < model.report().null_deviance);
    }

    #[test]
    fn predictions_follow_threshold() {
        let x = array![[0.0], [0.0], [0.0], [0.0], [1.0], [1.0], [1.0], [1.0]];
        let y = outcome(&[1, 0, 0, 0, 1, 1, 1, 0]);
        let d = design(&["x"], x);
        let model = LogisticRegression::new().fit(&d, &y).unwrap();
        let scored = model.predict(&d, 0.5).unwrap();
        assert!((scored[0].probability - 0.25).abs() < 1e-6);
        assert_eq!(scored[0].class, Class::Negative);
        assert_eq!(scored[4].class, Class::Positive);
        let lenient = model.predict(&d, 0.2).unwrap();
        assert_eq!(lenient[0].class, Class::Positive);
    }

    #[test]
    fn single_class_response_is_degenerate() {
        let d = design(&["x"], array![[0.0], [1.0], [2.0]]);
        let err = LogisticRegression::new().fit(&d, &outcome(&[0, 0, 0])).unwrap_err();
        assert!(matches!(
            err,
            ChurnError::DegenerateResponse {
                reason: DegenerateReason::SingleClass { class }
            } if class == "No"
        ));
    }

    #[test]
    fn collinear_columns_are_degenerate() {
        let d = design(
            &["a", "b"],
            array![[0.0, 0.0], [1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [1.0, 2.0]],
        );
        let err = LogisticRegression::new()
            .fit(&d, &outcome(&[0, 1, 0, 1, 1]))
            .unwrap_err();
        assert!(matches!(
            err,
            ChurnError::DegenerateResponse {
                reason: DegenerateReason::RankDeficient { column }
            } if column == "b"
        ));
    }

    #[test]
    fn separable_data_is_degenerate() {
        let d = design(&["x"], array![[1.0], [2.0], [3.0], [4.0]]);
        let err = LogisticRegression::new().fit(&d, &outcome(&[0, 0, 1, 1])).unwrap_err();
        assert!(matches!(
            err,
            ChurnError::DegenerateResponse {
                reason: DegenerateReason::Separation
            }
        ));
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let dataset = synthetic_customers(2000, 5).unwrap();
        let recipe = Recipe::new()
            .step_dummy(["gender", "is_senior_citizen"])
            .prep(&dataset.features)
            .unwrap();
        let design = recipe.bake(&dataset.features).unwrap();
        let err = LogisticRegression::new()
            .max_iterations(1)
            .fit(&design, &dataset.outcome)
            .unwrap_err();
        assert!(matches!(
            err,
            ChurnError::DegenerateResponse {
                reason: DegenerateReason::NotConverged { iterations: 1 }
            }
        ));
    }

    #[test]
    fn mismatched_design_is_rejected_at_predict() {
        let x = array![[0.0], [0.0], [1.0], [1.0]];
        let model = LogisticRegression::new()
            .fit(&design(&["x"], x.clone()), &outcome(&[1, 0, 1, 0]))
            .unwrap();
        assert!(model.predict(&design(&["z"], x), 0.5).is_err());
    }

    #[test]
    fn fits_synthetic_churn_with_expected_signs() {
        let dataset = synthetic_customers(4000, 21).unwrap();
        let split = stratified_split(&dataset, 0.7, 789).unwrap();
        let train = split.training(&dataset);
        let recipe = Recipe::new()
            .step_dummy(["gender", "is_senior_citizen"])
            .prep(&train.features)
            .unwrap();
        let baked = recipe.bake(&train.features).unwrap();
        let model = LogisticRegression::new().fit(&baked, &train.outcome).unwrap();
        let coef = |name: &str| {
            let idx = model.columns().iter().position(|c| c == name).unwrap();
            model.coefficients()[idx]
        };
        assert!(coef("tenure_months") < 0.0);
        assert!(coef("monthly_charges") > 0.0);
        assert!(model.report().score_norm < 1.0);
        assert!(model.terms().iter().all(|term| term.std_error > 0.0));
    }
}
