use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the analysis library.
pub type Result<T> = std::result::Result<T, ChurnError>;

/// Why a logistic fit could not produce a usable model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegenerateReason {
    /// The response holds fewer than two distinct classes.
    SingleClass {
        /// Label of the only class present (empty when there are no rows).
        class: String,
    },
    /// A design column is a linear combination of earlier ones.
    RankDeficient {
        /// First column found to be collinear.
        column: String,
    },
    /// The fitted linear predictor splits the classes perfectly, so no
    /// finite maximum-likelihood estimate exists.
    Separation,
    /// The solver stopped with the score still above the tolerance.
    NotConverged {
        /// Iteration cap of the solver.
        iterations: usize,
    },
}

impl fmt::Display for DegenerateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleClass { class } if class.is_empty() => {
                write!(f, "response has no observations")
            }
            Self::SingleClass { class } => {
                write!(f, "response has a single observed class `{class}`")
            }
            Self::RankDeficient { column } => {
                write!(f, "design matrix is rank deficient at column `{column}`")
            }
            Self::Separation => write!(f, "classes are perfectly separated by the predictors"),
            Self::NotConverged { iterations } => {
                write!(f, "solver did not converge within {iterations} iterations")
            }
        }
    }
}

/// Errors raised by the churn analysis. Every variant is terminal for the run.
#[derive(Debug, Error)]
pub enum ChurnError {
    /// A required column is absent from the input schema.
    #[error("missing column `{column}`")]
    MissingColumn {
        /// Column name after normalization.
        column: String,
    },
    /// The outcome column exists but holds no values at all.
    #[error("outcome column `{column}` is entirely missing")]
    OutcomeMissing {
        /// Outcome column name.
        column: String,
    },
    /// A cell could not be cast to the column's declared type.
    #[error("invalid value `{value}` in column `{column}` at row {row}")]
    InvalidValue {
        /// Column name.
        column: String,
        /// 1-based data row (header excluded).
        row: usize,
        /// Raw cell content.
        value: String,
    },
    /// A fitted recipe met a category level absent from its training data.
    #[error("unseen category `{level}` in column `{column}`")]
    UnseenCategory {
        /// Column name.
        column: String,
        /// Offending level.
        level: String,
    },
    /// The classifier could not be fit.
    #[error("degenerate response: {reason}")]
    DegenerateResponse {
        /// Cause of the failure.
        reason: DegenerateReason,
    },
    /// A rate metric has a zero denominator.
    #[error("{metric} is undefined: test data has no `{class}` instances")]
    UndefinedMetric {
        /// Metric name.
        metric: &'static str,
        /// Class missing from the test data.
        class: String,
    },
    /// The logistic solver rejected the problem or failed to run.
    #[error("logistic solver failed: {0}")]
    Solver(#[from] linfa_logistic::error::Error),
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// I/O error (filesystem).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV parsing failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON parsing failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChurnError {
    pub(crate) fn missing_column(column: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
        }
    }

    pub(crate) const fn degenerate(reason: DegenerateReason) -> Self {
        Self::DegenerateResponse { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = ChurnError::UnseenCategory {
            column: "gender".into(),
            level: "Other".into(),
        };
        assert_eq!(err.to_string(), "unseen category `Other` in column `gender`");

        let err = ChurnError::degenerate(DegenerateReason::RankDeficient {
            column: "gender_Male".into(),
        });
        assert!(err.to_string().contains("gender_Male"));

        let err = ChurnError::degenerate(DegenerateReason::SingleClass {
            class: String::new(),
        });
        assert!(err.to_string().contains("no observations"));
    }
}
