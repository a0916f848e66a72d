use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{ChurnError, Result};

/// Outcome class with an explicit positive marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    /// The event of interest (churned).
    Positive,
    /// Everything else (stayed).
    Negative,
}

impl Class {
    /// Response value used by the logistic fit (1 for positive).
    #[must_use]
    pub const fn indicator(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => 0.0,
        }
    }

    /// Classifies a positive-class probability against a threshold (`p >= threshold`).
    #[must_use]
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability >= threshold {
            Self::Positive
        } else {
            Self::Negative
        }
    }
}

/// Labels of a two-level outcome. The positive level is always listed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryLevels {
    /// Label of the positive level (e.g. `Yes` for churned).
    pub positive: String,
    /// Label of the negative level.
    pub negative: String,
}

impl BinaryLevels {
    /// Creates the level pair.
    #[must_use]
    pub fn new(positive: impl Into<String>, negative: impl Into<String>) -> Self {
        Self {
            positive: positive.into(),
            negative: negative.into(),
        }
    }

    /// Levels in declaration order, positive first.
    #[must_use]
    pub fn levels(&self) -> [&str; 2] {
        [&self.positive, &self.negative]
    }

    /// Label of a class.
    #[must_use]
    pub fn label(&self, class: Class) -> &str {
        match class {
            Class::Positive => &self.positive,
            Class::Negative => &self.negative,
        }
    }

    /// Maps a raw label to its class.
    #[must_use]
    pub fn classify(&self, raw: &str) -> Option<Class> {
        if raw == self.positive {
            Some(Class::Positive)
        } else if raw == self.negative {
            Some(Class::Negative)
        } else {
            None
        }
    }
}

/// Categorical column: ordered levels plus one level code per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    levels: IndexSet<String>,
    codes: Vec<usize>,
}

impl Factor {
    /// Builds a factor whose levels are the distinct values sorted alphabetically.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let raw: Vec<String> = values.into_iter().map(Into::into).collect();
        let mut levels: Vec<&str> = raw.iter().map(String::as_str).collect();
        levels.sort_unstable();
        levels.dedup();
        let levels: IndexSet<String> = levels.into_iter().map(str::to_owned).collect();
        let codes = raw
            .iter()
            .filter_map(|value| levels.get_index_of(value.as_str()))
            .collect();
        Self { levels, codes }
    }

    /// Builds a factor with an explicit level order. Returns the first value
    /// that is not one of `levels` as the error.
    pub fn with_levels<I, S>(levels: &[String], values: I) -> std::result::Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let levels: IndexSet<String> = levels.iter().cloned().collect();
        let mut codes = Vec::new();
        for value in values {
            let value = value.as_ref();
            match levels.get_index_of(value) {
                Some(code) => codes.push(code),
                None => return Err(value.to_owned()),
            }
        }
        Ok(Self { levels, codes })
    }

    /// Levels in order.
    #[must_use]
    pub const fn levels(&self) -> &IndexSet<String> {
        &self.levels
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// True when the factor has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Level label at a row.
    #[must_use]
    pub fn value(&self, row: usize) -> &str {
        &self.levels[self.codes[row]]
    }

    /// Iterates row labels in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.codes.iter().map(|&code| self.levels[code].as_str())
    }

    /// Subsets rows; the level set is kept as is.
    #[must_use]
    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            levels: self.levels.clone(),
            codes: rows.iter().map(|&row| self.codes[row]).collect(),
        }
    }

    /// Levels that occur at least once, in level order.
    #[must_use]
    pub fn observed_levels(&self) -> Vec<String> {
        self.counts()
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(level, _)| level)
            .collect()
    }

    /// Row count per level, in level order (zero counts included).
    #[must_use]
    pub fn counts(&self) -> Vec<(String, usize)> {
        let mut counts = vec![0usize; self.levels.len()];
        for &code in &self.codes {
            counts[code] += 1;
        }
        self.levels.iter().cloned().zip(counts).collect()
    }
}

/// Storage of a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    /// Real-valued column.
    Numeric(Vec<f64>),
    /// Categorical column.
    Categorical(Factor),
}

impl ColumnData {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Categorical(factor) => factor.len(),
        }
    }

    /// True when the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subsets rows.
    #[must_use]
    pub fn take(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(values) => Self::Numeric(rows.iter().map(|&row| values[row]).collect()),
            Self::Categorical(factor) => Self::Categorical(factor.take(rows)),
        }
    }

    /// Short type name used in reports and error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Numeric(_) => "numeric",
            Self::Categorical(_) => "categorical",
        }
    }
}

/// Ordered named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: IndexMap<String, ColumnData>,
    rows: usize,
}

impl Frame {
    /// Creates an empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends or replaces a column. Every column must have the same length.
    pub fn push_column(&mut self, name: impl Into<String>, data: ColumnData) -> Result<()> {
        let name = name.into();
        let replacing_only_column = self.columns.len() == 1 && self.columns.contains_key(&name);
        if !self.columns.is_empty() && !replacing_only_column && data.len() != self.rows {
            return Err(ChurnError::InvalidConfig(format!(
                "column `{name}` has {} rows, frame has {}",
                data.len(),
                self.rows
            )));
        }
        self.rows = data.len();
        self.columns.insert(name, data);
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub const fn nrows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.keys().map(String::as_str)
    }

    /// Iterates `(name, column)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnData)> + '_ {
        self.columns.iter().map(|(name, data)| (name.as_str(), data))
    }

    /// Looks a column up by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.get(name)
    }

    /// Looks a column up, failing with `MissingColumn`.
    pub fn require(&self, name: &str) -> Result<&ColumnData> {
        self.column(name).ok_or_else(|| ChurnError::missing_column(name))
    }

    /// Numeric column by name.
    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        match self.require(name)? {
            ColumnData::Numeric(values) => Ok(values),
            ColumnData::Categorical(_) => Err(ChurnError::InvalidConfig(format!(
                "column `{name}` is categorical, expected numeric"
            ))),
        }
    }

    /// Categorical column by name.
    pub fn categorical(&self, name: &str) -> Result<&Factor> {
        match self.require(name)? {
            ColumnData::Categorical(factor) => Ok(factor),
            ColumnData::Numeric(_) => Err(ChurnError::InvalidConfig(format!(
                "column `{name}` is numeric, expected categorical"
            ))),
        }
    }

    /// Subsets rows of every column.
    #[must_use]
    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|(name, data)| (name.clone(), data.take(rows)))
                .collect(),
            rows: rows.len(),
        }
    }
}

/// The labeled response of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Outcome column name.
    pub name: String,
    /// Level labels.
    pub levels: BinaryLevels,
    /// One class per row.
    pub values: Vec<Class>,
}

impl Outcome {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Count of rows in `class`.
    #[must_use]
    pub fn count(&self, class: Class) -> usize {
        self.values.iter().filter(|&&value| value == class).count()
    }

    /// Share of positive rows; `NaN` when empty.
    #[must_use]
    pub fn positive_share(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.count(Class::Positive) as f64 / self.values.len() as f64
    }

    /// Subsets rows.
    #[must_use]
    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            levels: self.levels.clone(),
            values: rows.iter().map(|&row| self.values[row]).collect(),
        }
    }
}

/// Predictors plus a fully observed outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Predictor columns.
    pub features: Frame,
    /// Response.
    pub outcome: Outcome,
}

impl Dataset {
    /// Pairs predictors with an outcome of the same length.
    pub fn new(features: Frame, outcome: Outcome) -> Result<Self> {
        if features.ncols() > 0 && features.nrows() != outcome.len() {
            return Err(ChurnError::InvalidConfig(format!(
                "features have {} rows, outcome has {}",
                features.nrows(),
                outcome.len()
            )));
        }
        Ok(Self { features, outcome })
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcome.len()
    }

    /// True when there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcome.is_empty()
    }

    /// Subsets records, preserving the order of `rows`.
    #[must_use]
    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            features: self.features.take(rows),
            outcome: self.outcome.take(rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_sorts_levels_and_subsets() {
        let factor = Factor::from_values(["Male", "Female", "Male"]);
        assert_eq!(factor.levels().iter().collect::<Vec<_>>(), vec!["Female", "Male"]);
        assert_eq!(factor.value(0), "Male");
        let sub = factor.take(&[0, 2]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.levels().len(), 2);
        assert_eq!(sub.observed_levels(), vec!["Male".to_string()]);
    }

    #[test]
    fn factor_with_levels_rejects_unknown() {
        let levels = vec!["Yes".to_string(), "No".to_string()];
        let factor = Factor::with_levels(&levels, ["No", "Yes"]).unwrap();
        assert_eq!(factor.counts(), vec![("Yes".into(), 1), ("No".into(), 1)]);
        assert_eq!(Factor::with_levels(&levels, ["Maybe"]).unwrap_err(), "Maybe");
    }

    #[test]
    fn frame_enforces_equal_lengths() {
        let mut frame = Frame::new();
        frame
            .push_column("tenure_months", ColumnData::Numeric(vec![1.0, 2.0]))
            .unwrap();
        let err = frame
            .push_column("monthly_charges", ColumnData::Numeric(vec![1.0]))
            .unwrap_err();
        assert!(matches!(err, ChurnError::InvalidConfig(_)));
        assert!(matches!(
            frame.require("gender"),
            Err(ChurnError::MissingColumn { .. })
        ));
    }

    #[test]
    fn outcome_share_and_labels() {
        let levels = BinaryLevels::new("Yes", "No");
        assert_eq!(levels.levels(), ["Yes", "No"]);
        assert_eq!(levels.classify("No"), Some(Class::Negative));
        let outcome = Outcome {
            name: "churn".into(),
            levels,
            values: vec![Class::Positive, Class::Negative, Class::Negative, Class::Negative],
        };
        assert!((outcome.positive_share() - 0.25).abs() < 1e-12);
        assert_eq!(Class::from_probability(0.5, 0.5), Class::Positive);
        assert_eq!(Class::from_probability(0.49, 0.5), Class::Negative);
    }
}
