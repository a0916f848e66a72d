//! Descriptive summaries of a labeled dataset.
//!
//! Nothing here is rendered. Every table is shaped so a charting front end can
//! draw the usual churn plots from it: bar charts of category counts split by
//! outcome, boxplots of numeric columns per outcome class, and a correlation grid.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::frame::{Class, ColumnData, Dataset};

/// Count and share of one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelCount {
    /// Level label.
    pub level: String,
    /// Rows at this level.
    pub count: usize,
    /// `count / rows`.
    pub proportion: f64,
}

/// Five-number summary plus mean and standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    /// Observations.
    pub n: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation.
    pub sd: f64,
    /// Minimum.
    pub min: f64,
    /// First quartile.
    pub q1: f64,
    /// Median.
    pub median: f64,
    /// Third quartile.
    pub q3: f64,
    /// Maximum.
    pub max: f64,
}

impl NumericSummary {
    /// Summarizes `values`; statistics of an empty slice are `NaN`.
    #[must_use]
    pub fn of(values: &[f64]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let mean = if n == 0 {
            f64::NAN
        } else {
            sorted.iter().sum::<f64>() / n as f64
        };
        let sd = if n < 2 {
            f64::NAN
        } else {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        };
        Self {
            n,
            mean,
            sd,
            min: quantile(&sorted, 0.0),
            q1: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q3: quantile(&sorted, 0.75),
            max: quantile(&sorted, 1.0),
        }
    }
}

/// Quantile of sorted data by linear interpolation between order statistics
/// (Hyndman-Fan type 7).
fn quantile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Numeric column summarized overall and per outcome class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericProfile {
    /// Column name.
    pub column: String,
    /// All rows.
    pub overall: NumericSummary,
    /// Rows with the positive outcome.
    pub positive: NumericSummary,
    /// Rows with the negative outcome.
    pub negative: NumericSummary,
}

/// One level of a category crossed with the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosstabRow {
    /// Level label.
    pub level: String,
    /// Positive-outcome rows at this level.
    pub positive: usize,
    /// Negative-outcome rows at this level.
    pub negative: usize,
    /// `positive / (positive + negative)`, `NaN` for an empty level.
    pub positive_share: f64,
}

/// Categorical column frequencies and outcome crosstab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalProfile {
    /// Column name.
    pub column: String,
    /// Frequency of each level.
    pub frequencies: Vec<LevelCount>,
    /// Each level split by outcome.
    pub crosstab: Vec<CrosstabRow>,
}

/// Everything the exploratory step reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploreReport {
    /// Rows analysed.
    pub rows: usize,
    /// Outcome column name.
    pub outcome: String,
    /// Outcome frequency table, positive level first.
    pub outcome_counts: Vec<LevelCount>,
    /// Numeric columns.
    pub numeric: Vec<NumericProfile>,
    /// Categorical columns.
    pub categorical: Vec<CategoricalProfile>,
    /// Pearson correlation of every numeric pair, keyed `a` then `b`.
    pub correlations: IndexMap<String, IndexMap<String, f64>>,
}

/// Summarizes a labeled dataset.
#[must_use]
pub fn explore(dataset: &Dataset) -> ExploreReport {
    let rows = dataset.len();
    let share = |count: usize| {
        if rows == 0 {
            f64::NAN
        } else {
            count as f64 / rows as f64
        }
    };
    let outcome_counts = [Class::Positive, Class::Negative]
        .into_iter()
        .map(|class| {
            let count = dataset.outcome.count(class);
            LevelCount {
                level: dataset.outcome.levels.label(class).to_owned(),
                count,
                proportion: share(count),
            }
        })
        .collect();

    let classes = &dataset.outcome.values;
    let mut numeric = Vec::new();
    let mut categorical = Vec::new();
    for (name, data) in dataset.features.iter() {
        match data {
            ColumnData::Numeric(values) => {
                let by_class = |wanted: Class| -> Vec<f64> {
                    values
                        .iter()
                        .zip(classes)
                        .filter(|&(_, &class)| class == wanted)
                        .map(|(&value, _)| value)
                        .collect()
                };
                numeric.push(NumericProfile {
                    column: name.to_owned(),
                    overall: NumericSummary::of(values),
                    positive: NumericSummary::of(&by_class(Class::Positive)),
                    negative: NumericSummary::of(&by_class(Class::Negative)),
                });
            }
            ColumnData::Categorical(factor) => {
                let frequencies = factor
                    .counts()
                    .into_iter()
                    .map(|(level, count)| LevelCount {
                        level,
                        count,
                        proportion: share(count),
                    })
                    .collect();
                let mut tallies: IndexMap<&str, (usize, usize)> =
                    factor.levels().iter().map(|level| (level.as_str(), (0, 0))).collect();
                for (value, class) in factor.iter().zip(classes) {
                    if let Some(entry) = tallies.get_mut(value) {
                        match class {
                            Class::Positive => entry.0 += 1,
                            Class::Negative => entry.1 += 1,
                        }
                    }
                }
                let crosstab = tallies
                    .into_iter()
                    .map(|(level, (positive, negative))| CrosstabRow {
                        level: level.to_owned(),
                        positive,
                        negative,
                        positive_share: if positive + negative == 0 {
                            f64::NAN
                        } else {
                            positive as f64 / (positive + negative) as f64
                        },
                    })
                    .collect();
                categorical.push(CategoricalProfile {
                    column: name.to_owned(),
                    frequencies,
                    crosstab,
                });
            }
        }
    }

    let numeric_columns: Vec<(&str, &[f64])> = dataset
        .features
        .iter()
        .filter_map(|(name, data)| match data {
            ColumnData::Numeric(values) => Some((name, values.as_slice())),
            ColumnData::Categorical(_) => None,
        })
        .collect();
    let correlations = numeric_columns
        .iter()
        .map(|(a, xs)| {
            let row = numeric_columns
                .iter()
                .map(|(b, ys)| ((*b).to_owned(), pearson(xs, ys)))
                .collect();
            ((*a).to_owned(), row)
        })
        .collect();

    ExploreReport {
        rows,
        outcome: dataset.outcome.name.clone(),
        outcome_counts,
        numeric,
        categorical,
        correlations,
    }
}

/// Pearson correlation; `NaN` when either side has no variance.
fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return f64::NAN;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let (dx, dy) = (x - mean_x, y - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if denom == 0.0 {
        f64::NAN
    } else {
        sxy / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Schema;
    use crate::dataloader::{load_reader, synthetic_customers};
    use std::io::Cursor;

    #[test]
    fn quantiles_follow_type_seven() {
        let summary = NumericSummary::of(&[1.0, 2.0, 3.0, 4.0]);
        assert!((summary.q1 - 1.75).abs() < 1e-12);
        assert!((summary.median - 2.5).abs() < 1e-12);
        assert!((summary.q3 - 3.25).abs() < 1e-12);
        assert_eq!((summary.min, summary.max), (1.0, 4.0));
        assert!(NumericSummary::of(&[]).median.is_nan());
    }

    #[test]
    fn reports_outcome_balance_and_crosstabs() {
        let data = "\
gender,SeniorCitizen,tenure,MonthlyCharges,Churn
Female,0,1,29.85,No
Male,0,34,56.95,No
Male,1,2,53.85,Yes
Female,1,2,70.70,Yes
";
        let (dataset, _) = load_reader(Cursor::new(data), &Schema::telco()).unwrap();
        let report = explore(&dataset);
        assert_eq!(report.rows, 4);
        assert_eq!(report.outcome_counts[0].level, "Yes");
        assert!((report.outcome_counts[0].proportion - 0.5).abs() < 1e-12);

        let senior = report
            .categorical
            .iter()
            .find(|profile| profile.column == "is_senior_citizen")
            .unwrap();
        assert_eq!(senior.crosstab[0].level, "Yes");
        assert_eq!((senior.crosstab[0].positive, senior.crosstab[0].negative), (2, 0));
        assert!((senior.crosstab[1].positive_share).abs() < 1e-12);

        let tenure = &report.numeric[0];
        assert_eq!(tenure.column, "tenure_months");
        assert_eq!(tenure.positive.n, 2);
        assert!((tenure.negative.max - 34.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_grid_is_symmetric_with_unit_diagonal() {
        let dataset = synthetic_customers(500, 3).unwrap();
        let report = explore(&dataset);
        let grid = &report.correlations;
        let ab = grid["tenure_months"]["monthly_charges"];
        let ba = grid["monthly_charges"]["tenure_months"];
        assert!((ab - ba).abs() < 1e-12);
        assert!((grid["tenure_months"]["tenure_months"] - 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0], &[2.0, 3.0]).is_nan());
    }
}
