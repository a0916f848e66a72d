use serde::{Deserialize, Serialize};

use crate::{
    error::{ChurnError, Result},
    frame::{ColumnData, Factor, Frame},
};

use super::UnseenLevelPolicy;

/// A declared, not yet fitted, preprocessing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// One indicator column per non-reference level of each categorical column.
    Dummy {
        /// Columns to encode.
        columns: Vec<String>,
    },
    /// Center and scale numeric columns with training mean and standard deviation.
    Normalize {
        /// Columns to standardize.
        columns: Vec<String>,
    },
}

impl Step {
    /// Columns the step touches.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            Self::Dummy { columns } | Self::Normalize { columns } => columns,
        }
    }
}

/// Learned dummy encoding of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummyEncoding {
    /// Encoded column.
    pub column: String,
    /// Dropped level; rows at this level get all-zero indicators.
    pub reference: String,
    /// Levels that receive an indicator, in output order.
    pub levels: Vec<String>,
}

impl DummyEncoding {
    pub(super) fn fit(column: &str, factor: &Factor) -> Self {
        let mut observed = factor.observed_levels().into_iter();
        let reference = observed.next().unwrap_or_default();
        Self {
            column: column.to_owned(),
            reference,
            levels: observed.collect(),
        }
    }

    /// Output names, `<column>_<level>` with non-alphanumerics replaced by `_`.
    #[must_use]
    pub fn output_names(&self) -> Vec<String> {
        self.levels
            .iter()
            .map(|level| {
                let level: String = level
                    .chars()
                    .map(|ch| if ch.is_alphanumeric() { ch } else { '_' })
                    .collect();
                format!("{}_{level}", self.column)
            })
            .collect()
    }

    pub(super) fn apply(
        &self,
        factor: &Factor,
        policy: UnseenLevelPolicy,
    ) -> Result<Vec<Vec<f64>>> {
        let mut out = vec![vec![0.0; factor.len()]; self.levels.len()];
        for (row, value) in factor.iter().enumerate() {
            if let Some(pos) = self.levels.iter().position(|level| level == value) {
                out[pos][row] = 1.0;
            } else if value != self.reference && policy == UnseenLevelPolicy::Error {
                return Err(ChurnError::UnseenCategory {
                    column: self.column.clone(),
                    level: value.to_owned(),
                });
            }
        }
        Ok(out)
    }
}

/// Learned centering and scaling of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    /// Standardized column.
    pub column: String,
    /// Training mean.
    pub mean: f64,
    /// Training sample standard deviation.
    pub sd: f64,
}

impl Standardization {
    pub(super) fn fit(column: &str, values: &[f64]) -> Result<Self> {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let sd = var.sqrt();
        if !(sd.is_finite() && sd > 0.0) {
            return Err(ChurnError::InvalidConfig(format!(
                "cannot normalize `{column}`: zero or undefined variance in training data"
            )));
        }
        Ok(Self {
            column: column.to_owned(),
            mean,
            sd,
        })
    }

    pub(super) fn apply(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| (v - self.mean) / self.sd).collect()
    }
}

/// A step together with the parameters it learned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum FittedStep {
    /// Fitted dummy encodings.
    Dummy {
        /// One encoding per column.
        encodings: Vec<DummyEncoding>,
    },
    /// Fitted standardizations.
    Normalize {
        /// One standardization per column.
        scalers: Vec<Standardization>,
    },
}

impl FittedStep {
    pub(super) fn fit(step: &Step, frame: &Frame) -> Result<Self> {
        match step {
            Step::Dummy { columns } => {
                let encodings = columns
                    .iter()
                    .map(|column| match frame.require(column)? {
                        ColumnData::Categorical(factor) => Ok(DummyEncoding::fit(column, factor)),
                        ColumnData::Numeric(_) => Err(ChurnError::InvalidConfig(format!(
                            "dummy step needs a categorical column, `{column}` is numeric"
                        ))),
                    })
                    .collect::<Result<_>>()?;
                Ok(Self::Dummy { encodings })
            }
            Step::Normalize { columns } => {
                let scalers = columns
                    .iter()
                    .map(|column| match frame.require(column)? {
                        ColumnData::Numeric(values) => Standardization::fit(column, values),
                        ColumnData::Categorical(_) => Err(ChurnError::InvalidConfig(format!(
                            "normalize step needs a numeric column, `{column}` is categorical"
                        ))),
                    })
                    .collect::<Result<_>>()?;
                Ok(Self::Normalize { scalers })
            }
        }
    }
}
