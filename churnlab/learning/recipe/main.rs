//! Fit-then-apply preprocessing recipes.
//!
//! A [`Recipe`] only declares steps. [`Recipe::prep`] learns every step's
//! parameters from the frame it is given (the training data) and returns a
//! [`FittedRecipe`], which then bakes any frame with the training schema into
//! the same design columns. The outcome is never part of the frame, so a recipe
//! cannot see it.

/// Step declarations and their learned parameters.
pub mod steps;

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ChurnError, Result},
    frame::{ColumnData, Frame},
};

pub use steps::{DummyEncoding, FittedStep, Standardization, Step};

/// What baking does with a category level that was absent from the training data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenLevelPolicy {
    /// Fail with `UnseenCategory`.
    #[default]
    Error,
    /// Emit an all-zero indicator row, i.e. treat the level like the reference level.
    ZeroIndicator,
}

/// Declarative list of preprocessing steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    steps: Vec<Step>,
    unseen_levels: UnseenLevelPolicy,
}

impl Recipe {
    /// Creates an empty recipe (numeric pass-through).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dummy-encoding step.
    #[must_use]
    pub fn step_dummy<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(Step::Dummy {
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds a centering/scaling step.
    #[must_use]
    pub fn step_normalize<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(Step::Normalize {
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Sets the unseen-level policy used when baking.
    #[must_use]
    pub const fn unseen_levels(mut self, policy: UnseenLevelPolicy) -> Self {
        self.unseen_levels = policy;
        self
    }

    /// Declared steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Learns step parameters from `train` only.
    pub fn prep(&self, train: &Frame) -> Result<FittedRecipe> {
        if train.nrows() == 0 {
            return Err(ChurnError::InvalidConfig(
                "cannot prep a recipe on an empty frame".into(),
            ));
        }
        let steps = self
            .steps
            .iter()
            .map(|step| FittedStep::fit(step, train))
            .collect::<Result<Vec<_>>>()?;

        let mut inputs = Vec::with_capacity(train.ncols());
        let mut outputs = Vec::new();
        for (name, data) in train.iter() {
            let encoding = steps.iter().find_map(|step| match step {
                FittedStep::Dummy { encodings } => encodings.iter().find(|enc| enc.column == name),
                FittedStep::Normalize { .. } => None,
            });
            match (data, encoding) {
                (ColumnData::Categorical(_), Some(encoding)) => {
                    outputs.extend(encoding.output_names());
                }
                (ColumnData::Categorical(_), None) => {
                    return Err(ChurnError::InvalidConfig(format!(
                        "categorical column `{name}` needs a dummy step"
                    )));
                }
                (ColumnData::Numeric(_), _) => outputs.push(name.to_owned()),
            }
            inputs.push(InputColumn {
                name: name.to_owned(),
                kind: data.kind().to_owned(),
            });
        }

        Ok(FittedRecipe {
            steps,
            inputs,
            outputs,
            unseen_levels: self.unseen_levels,
        })
    }
}

/// Name and type of a column the recipe was fitted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputColumn {
    /// Column name.
    pub name: String,
    /// `numeric` or `categorical`.
    pub kind: String,
}

/// A recipe with learned parameters. Read-only once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedRecipe {
    steps: Vec<FittedStep>,
    inputs: Vec<InputColumn>,
    outputs: Vec<String>,
    unseen_levels: UnseenLevelPolicy,
}

impl FittedRecipe {
    /// Learned steps.
    #[must_use]
    pub fn steps(&self) -> &[FittedStep] {
        &self.steps
    }

    /// Columns the recipe expects.
    #[must_use]
    pub fn inputs(&self) -> &[InputColumn] {
        &self.inputs
    }

    /// Design column names produced by [`Self::bake`].
    #[must_use]
    pub fn output_columns(&self) -> &[String] {
        &self.outputs
    }

    /// Policy applied to unseen levels.
    #[must_use]
    pub const fn unseen_levels(&self) -> UnseenLevelPolicy {
        self.unseen_levels
    }

    fn encoding(&self, column: &str) -> Option<&DummyEncoding> {
        self.steps.iter().find_map(|step| match step {
            FittedStep::Dummy { encodings } => encodings.iter().find(|enc| enc.column == column),
            FittedStep::Normalize { .. } => None,
        })
    }

    fn scaler(&self, column: &str) -> Option<&Standardization> {
        self.steps.iter().find_map(|step| match step {
            FittedStep::Normalize { scalers } => scalers.iter().find(|sc| sc.column == column),
            FittedStep::Dummy { .. } => None,
        })
    }

    /// Applies the learned transformation. Extra columns in `frame` are ignored.
    pub fn bake(&self, frame: &Frame) -> Result<DesignMatrix> {
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(self.outputs.len());
        for input in &self.inputs {
            match frame.require(&input.name)? {
                ColumnData::Categorical(factor) => {
                    let encoding = self.encoding(&input.name).ok_or_else(|| {
                        ChurnError::InvalidConfig(format!(
                            "column `{}` was numeric when the recipe was fitted",
                            input.name
                        ))
                    })?;
                    columns.extend(encoding.apply(factor, self.unseen_levels)?);
                }
                ColumnData::Numeric(values) => {
                    if self.encoding(&input.name).is_some() {
                        return Err(ChurnError::InvalidConfig(format!(
                            "column `{}` was categorical when the recipe was fitted",
                            input.name
                        )));
                    }
                    match self.scaler(&input.name) {
                        Some(scaler) => columns.push(scaler.apply(values)),
                        None => columns.push(values.clone()),
                    }
                }
            }
        }

        let rows = frame.nrows();
        let values = Array2::from_shape_fn((rows, columns.len()), |(row, col)| columns[col][row]);
        Ok(DesignMatrix {
            columns: self.outputs.clone(),
            values,
        })
    }
}

/// Numeric predictors ready for the classifier, one row per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignMatrix {
    /// Column names.
    pub columns: Vec<String>,
    /// Row-major values (`rows x columns`).
    pub values: Array2<f64>,
}

impl DesignMatrix {
    /// Number of rows.
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    /// Number of columns.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// Column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|column| column == name)
            .map(|idx| self.values.index_axis(Axis(1), idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Factor;

    fn frame(genders: &[&str], seniors: &[&str], tenure: &[f64]) -> Frame {
        let yes_no = ["Yes".to_string(), "No".to_string()];
        let mut frame = Frame::new();
        frame
            .push_column(
                "gender",
                ColumnData::Categorical(Factor::from_values(genders.iter().copied())),
            )
            .unwrap();
        frame
            .push_column(
                "is_senior_citizen",
                ColumnData::Categorical(Factor::with_levels(&yes_no, seniors).unwrap()),
            )
            .unwrap();
        frame
            .push_column("tenure_months", ColumnData::Numeric(tenure.to_vec()))
            .unwrap();
        frame
    }

    fn recipe() -> Recipe {
        Recipe::new().step_dummy(["gender", "is_senior_citizen"])
    }

    #[test]
    fn train_and_test_share_output_columns() {
        let train = frame(&["Female", "Male", "Male"], &["Yes", "No", "No"], &[1.0, 2.0, 3.0]);
        let test = frame(&["Male"], &["No"], &[5.0]);
        let fitted = recipe().prep(&train).unwrap();
        let baked_train = fitted.bake(&train).unwrap();
        let baked_test = fitted.bake(&test).unwrap();
        assert_eq!(
            baked_train.columns,
            vec!["gender_Male", "is_senior_citizen_No", "tenure_months"]
        );
        assert_eq!(baked_train.columns, baked_test.columns);
        assert_eq!(baked_test.values.row(0).to_vec(), vec![1.0, 1.0, 5.0]);
        assert_eq!(baked_train.column("gender_Male").unwrap().to_vec(), vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn levels_come_from_training_rows_only() {
        // "Female" exists as a factor level but never occurs in training.
        let full = frame(&["Female", "Male", "Male"], &["Yes", "No", "Yes"], &[1.0, 2.0, 3.0]);
        let train = full.take(&[1, 2]);
        let fitted = recipe().prep(&train).unwrap();
        assert_eq!(fitted.output_columns(), &["is_senior_citizen_No", "tenure_months"]);

        let err = fitted.bake(&full).unwrap_err();
        assert!(matches!(
            err,
            ChurnError::UnseenCategory { column, level } if column == "gender" && level == "Female"
        ));
    }

    #[test]
    fn zero_indicator_policy_maps_unseen_levels_to_reference() {
        let train = frame(&["Female", "Male"], &["Yes", "No"], &[1.0, 2.0]);
        let test = frame(&["Nonbinary"], &["Yes"], &[4.0]);
        let strict = recipe().prep(&train).unwrap();
        assert!(strict.bake(&test).is_err());

        let lenient = recipe()
            .unseen_levels(UnseenLevelPolicy::ZeroIndicator)
            .prep(&train)
            .unwrap();
        let baked = lenient.bake(&test).unwrap();
        assert_eq!(baked.values.row(0).to_vec(), vec![0.0, 0.0, 4.0]);
    }

    #[test]
    fn normalize_uses_training_statistics() {
        let train = frame(&["Female", "Male", "Male"], &["Yes", "No", "No"], &[1.0, 2.0, 3.0]);
        let test = frame(&["Male"], &["No"], &[4.0]);
        let fitted = recipe()
            .step_normalize(["tenure_months"])
            .prep(&train)
            .unwrap();
        let baked = fitted.bake(&test).unwrap();
        assert_eq!(baked.column("tenure_months").unwrap().to_vec(), vec![2.0]);
    }

    #[test]
    fn categorical_without_dummy_step_is_rejected() {
        let train = frame(&["Female", "Male"], &["Yes", "No"], &[1.0, 2.0]);
        let err = Recipe::new().step_dummy(["gender"]).prep(&train).unwrap_err();
        assert!(matches!(err, ChurnError::InvalidConfig(_)));
    }

    #[test]
    fn bake_requires_recipe_columns() {
        let train = frame(&["Female", "Male"], &["Yes", "No"], &[1.0, 2.0]);
        let fitted = recipe().prep(&train).unwrap();
        let mut partial = Frame::new();
        partial
            .push_column("tenure_months", ColumnData::Numeric(vec![1.0]))
            .unwrap();
        assert!(matches!(
            fitted.bake(&partial),
            Err(ChurnError::MissingColumn { column }) if column == "gender"
        ));
    }
}
