use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ChurnError, Result},
    frame::BinaryLevels,
    recipe::UnseenLevelPolicy,
};

/// How a selected input column is cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    /// Real number; negative values are rejected when `non_negative` is set.
    Numeric {
        /// Reject negative values.
        #[serde(default)]
        non_negative: bool,
    },
    /// Text category. Without explicit `levels` the levels are sorted alphabetically.
    Categorical {
        /// Explicit level order.
        #[serde(default)]
        levels: Option<Vec<String>>,
    },
    /// 0/1 flag recoded to a two-level category, `true_level` listed first.
    Indicator {
        /// Label for `1`.
        true_level: String,
        /// Label for `0`.
        false_level: String,
    },
}

/// A predictor to keep: its normalized source name, output name and cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name after snake-case normalization of the header.
    pub source: String,
    /// Name in the loaded frame.
    pub name: String,
    /// Cast applied on load.
    pub kind: ColumnKind,
}

impl ColumnSpec {
    fn new(source: &str, name: &str, kind: ColumnKind) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            kind,
        }
    }
}

/// The binary response column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    /// Column name after normalization.
    pub source: String,
    /// Name in the loaded dataset.
    pub name: String,
    /// Raw label of the positive (churned) level.
    pub positive: String,
    /// Raw label of the negative level.
    pub negative: String,
}

impl OutcomeSpec {
    /// Level pair, positive first.
    #[must_use]
    pub fn levels(&self) -> BinaryLevels {
        BinaryLevels::new(&self.positive, &self.negative)
    }
}

/// Columns retained from the input file and how they are typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Response column.
    pub outcome: OutcomeSpec,
    /// Predictor columns, in output order.
    pub predictors: Vec<ColumnSpec>,
    /// Optional customer identifier column, carried alongside loaded rows
    /// when the file has it.
    #[serde(default = "default_id_column")]
    pub id_column: Option<String>,
    /// Cell contents treated as missing (compared after trimming).
    #[serde(default = "default_missing_tokens")]
    pub missing_tokens: Vec<String>,
}

#[allow(clippy::unnecessary_wraps)]
fn default_id_column() -> Option<String> {
    Some("customer_id".into())
}

fn default_missing_tokens() -> Vec<String> {
    vec![String::new(), "NA".into()]
}

impl Schema {
    /// Telco customer churn layout: outcome `churn` and four predictors.
    #[must_use]
    pub fn telco() -> Self {
        Self {
            outcome: OutcomeSpec {
                source: "churn".into(),
                name: "churn".into(),
                positive: "Yes".into(),
                negative: "No".into(),
            },
            predictors: vec![
                ColumnSpec::new("gender", "gender", ColumnKind::Categorical { levels: None }),
                ColumnSpec::new(
                    "senior_citizen",
                    "is_senior_citizen",
                    ColumnKind::Indicator {
                        true_level: "Yes".into(),
                        false_level: "No".into(),
                    },
                ),
                ColumnSpec::new(
                    "tenure",
                    "tenure_months",
                    ColumnKind::Numeric { non_negative: true },
                ),
                ColumnSpec::new(
                    "monthly_charges",
                    "monthly_charges",
                    ColumnKind::Numeric { non_negative: true },
                ),
            ],
            id_column: default_id_column(),
            missing_tokens: default_missing_tokens(),
        }
    }

    /// Output names of the predictors.
    pub fn predictor_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.predictors.iter().map(|spec| spec.name.as_str())
    }

    pub(crate) fn is_missing(&self, cell: &str) -> bool {
        let cell = cell.trim();
        self.missing_tokens.iter().any(|token| token == cell)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::telco()
    }
}

/// Settings of one analysis run. Every field has a default, so partial JSON files work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Seed of the stratified split.
    pub seed: u64,
    /// Share of rows assigned to training, in (0, 1).
    pub train_ratio: f64,
    /// Probability at or above which a row is predicted positive.
    pub threshold: f64,
    /// Input layout.
    pub schema: Schema,
    /// Categorical columns to dummy encode.
    pub dummy_columns: Vec<String>,
    /// Numeric columns to center and scale.
    pub normalize_columns: Vec<String>,
    /// What baking does with a level the recipe never saw.
    pub unseen_levels: UnseenLevelPolicy,
    /// Solver iteration cap.
    pub max_iterations: usize,
    /// Solver gradient tolerance.
    pub tolerance: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            seed: 789,
            train_ratio: 0.7,
            threshold: 0.5,
            schema: Schema::telco(),
            dummy_columns: vec!["gender".into(), "is_senior_citizen".into()],
            normalize_columns: Vec::new(),
            unseen_levels: UnseenLevelPolicy::Error,
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

impl AnalysisConfig {
    /// Reads a JSON config file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges and that recipe columns are declared predictors.
    pub fn validate(&self) -> Result<()> {
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return Err(ChurnError::InvalidConfig(format!(
                "train_ratio must be in (0, 1), got {}",
                self.train_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ChurnError::InvalidConfig(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        if self.max_iterations == 0 || self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err(ChurnError::InvalidConfig(
                "max_iterations and tolerance must be positive".into(),
            ));
        }
        if self.schema.outcome.positive == self.schema.outcome.negative {
            return Err(ChurnError::InvalidConfig("outcome levels must differ".into()));
        }
        for column in self.dummy_columns.iter().chain(&self.normalize_columns) {
            if !self.schema.predictor_names().any(|name| name == column) {
                return Err(ChurnError::InvalidConfig(format!(
                    "recipe column `{column}` is not a schema predictor"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_the_reference_analysis() {
        let config = AnalysisConfig::default();
        assert_eq!(config.seed, 789);
        assert!((config.train_ratio - 0.7).abs() < f64::EPSILON);
        assert_eq!(
            config.schema.predictor_names().collect::<Vec<_>>(),
            vec!["gender", "is_senior_citizen", "tenure_months", "monthly_charges"]
        );
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "seed": 42, "unseen_levels": "zero_indicator" }"#).unwrap();
        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.unseen_levels, UnseenLevelPolicy::ZeroIndicator);
        assert_eq!(config.dummy_columns.len(), 2);
    }

    #[test]
    fn validation_rejects_bad_ratio_and_unknown_columns() {
        let mut config = AnalysisConfig {
            train_ratio: 1.0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(config.validate(), Err(ChurnError::InvalidConfig(_))));
        config.train_ratio = 0.7;
        config.dummy_columns.push("contract".into());
        assert!(matches!(config.validate(), Err(ChurnError::InvalidConfig(_))));
    }

    #[test]
    fn missing_tokens_are_trimmed() {
        let schema = Schema::telco();
        assert!(schema.is_missing("  "));
        assert!(schema.is_missing("NA"));
        assert!(!schema.is_missing("No"));
    }
}
