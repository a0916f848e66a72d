use serde::{Deserialize, Serialize};

use crate::{
    classifier::LogisticModel,
    error::{ChurnError, Result},
    frame::{Class, Dataset, Frame},
    recipe::FittedRecipe,
};

/// Prediction for one scored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Row index within the scored data.
    pub row: usize,
    /// 1-based data row of the input file, when the rows came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_row: Option<usize>,
    /// Customer identifier, when the input carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Observed class, when the data was labeled.
    pub actual: Option<Class>,
    /// Predicted class.
    pub predicted: Class,
    /// Positive-class probability.
    pub probability: f64,
}

/// Two-by-two table of actual against predicted classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Predicted positive, actually positive.
    pub tp: usize,
    /// Predicted positive, actually negative.
    pub fp: usize,
    /// Predicted negative, actually positive.
    #[serde(rename = "fn")]
    pub fn_: usize,
    /// Predicted negative, actually negative.
    pub tn: usize,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        f64::NAN
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ConfusionMatrix {
    /// Tallies `(actual, predicted)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Class, Class)>) -> Self {
        let mut matrix = Self::default();
        for pair in pairs {
            match pair {
                (Class::Positive, Class::Positive) => matrix.tp += 1,
                (Class::Negative, Class::Positive) => matrix.fp += 1,
                (Class::Positive, Class::Negative) => matrix.fn_ += 1,
                (Class::Negative, Class::Negative) => matrix.tn += 1,
            }
        }
        matrix
    }

    /// Number of tallied rows.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.tp + self.fp + self.fn_ + self.tn
    }

    /// Actual positives (`TP + FN`).
    #[must_use]
    pub const fn positives(&self) -> usize {
        self.tp + self.fn_
    }

    /// Actual negatives (`TN + FP`).
    #[must_use]
    pub const fn negatives(&self) -> usize {
        self.tn + self.fp
    }

    /// `(TP + TN) / total`, `NaN` for an empty table.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// `TP / (TP + FN)`, `NaN` without actual positives.
    #[must_use]
    pub fn sensitivity(&self) -> f64 {
        ratio(self.tp, self.positives())
    }

    /// `TN / (TN + FP)`, `NaN` without actual negatives.
    #[must_use]
    pub fn specificity(&self) -> f64 {
        ratio(self.tn, self.negatives())
    }

    /// `TP / (TP + FP)`, `NaN` when nothing was predicted positive.
    #[must_use]
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Harmonic mean of precision and sensitivity.
    #[must_use]
    pub fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }

    /// Accuracy, failing on an empty table.
    pub fn try_accuracy(&self) -> Result<f64> {
        if self.total() == 0 {
            return Err(ChurnError::UndefinedMetric {
                metric: "accuracy",
                class: "any".into(),
            });
        }
        Ok(self.accuracy())
    }

    /// Sensitivity, failing when the test data has no positives.
    pub fn try_sensitivity(&self) -> Result<f64> {
        if self.positives() == 0 {
            return Err(ChurnError::UndefinedMetric {
                metric: "sensitivity",
                class: "positive".into(),
            });
        }
        Ok(self.sensitivity())
    }

    /// Specificity, failing when the test data has no negatives.
    pub fn try_specificity(&self) -> Result<f64> {
        if self.negatives() == 0 {
            return Err(ChurnError::UndefinedMetric {
                metric: "specificity",
                class: "negative".into(),
            });
        }
        Ok(self.specificity())
    }

    /// `(metric, value)` rows: accuracy, sensitivity, specificity, precision, f1.
    #[must_use]
    pub fn metric_table(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("accuracy", self.accuracy()),
            ("sensitivity", self.sensitivity()),
            ("specificity", self.specificity()),
            ("precision", self.precision()),
            ("f1", self.f1()),
        ]
    }

    /// Named metric values.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        Metrics {
            accuracy: self.accuracy(),
            sensitivity: self.sensitivity(),
            specificity: self.specificity(),
            precision: self.precision(),
            f1: self.f1(),
        }
    }
}

/// Headline metrics. Undefined rates are `NaN` (serialized as `null`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Share of correct predictions.
    pub accuracy: f64,
    /// True positive rate.
    pub sensitivity: f64,
    /// True negative rate.
    pub specificity: f64,
    /// Positive predictive value.
    pub precision: f64,
    /// F1 score.
    pub f1: f64,
}

/// Scored test data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Threshold used for classification.
    pub threshold: f64,
    /// One record per test row, in row order.
    pub predictions: Vec<PredictionRecord>,
    /// Tallies.
    pub matrix: ConfusionMatrix,
    /// Rates derived from the tallies.
    pub metrics: Metrics,
}

impl Evaluation {
    /// Metrics whose value is undefined for this test data.
    #[must_use]
    pub fn undefined_metrics(&self) -> Vec<&'static str> {
        self.matrix
            .metric_table()
            .into_iter()
            .filter(|(_, value)| value.is_nan())
            .map(|(name, _)| name)
            .collect()
    }

    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[EVAL] n={} threshold={} tp={} fp={} fn={} tn={} \
             accuracy={:.4} sensitivity={:.4} specificity={:.4}",
            self.matrix.total(),
            self.threshold,
            self.matrix.tp,
            self.matrix.fp,
            self.matrix.fn_,
            self.matrix.tn,
            self.metrics.accuracy,
            self.metrics.sensitivity,
            self.metrics.specificity
        )
    }
}

/// Bakes `test` with the training recipe, predicts and tallies against the truth.
pub fn evaluate(
    model: &LogisticModel,
    recipe: &FittedRecipe,
    test: &Dataset,
    threshold: f64,
) -> Result<Evaluation> {
    let scored = score_frame(model, recipe, &test.features, threshold)?;
    let predictions: Vec<PredictionRecord> = scored
        .into_iter()
        .zip(&test.outcome.values)
        .map(|(record, &actual)| PredictionRecord {
            actual: Some(actual),
            ..record
        })
        .collect();
    let matrix = ConfusionMatrix::from_pairs(
        predictions
            .iter()
            .filter_map(|record| record.actual.map(|actual| (actual, record.predicted))),
    );
    Ok(Evaluation {
        threshold,
        predictions,
        matrix,
        metrics: matrix.metrics(),
    })
}

/// Scores rows whose outcome is unknown.
pub fn score_frame(
    model: &LogisticModel,
    recipe: &FittedRecipe,
    frame: &Frame,
    threshold: f64,
) -> Result<Vec<PredictionRecord>> {
    let design = recipe.bake(frame)?;
    Ok(model
        .predict(&design, threshold)?
        .into_iter()
        .enumerate()
        .map(|(row, scored)| PredictionRecord {
            row,
            source_row: None,
            customer_id: None,
            actual: None,
            predicted: scored.class,
            probability: scored.probability,
        })
        .collect())
}
