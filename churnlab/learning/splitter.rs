use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ChurnError, Result},
    frame::{Class, Dataset},
};

/// Disjoint train/test row indices of one dataset, created once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    train: Vec<usize>,
    test: Vec<usize>,
    ratio: f64,
    seed: u64,
}

/// Sizes and class balance of a split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    /// Rows in the training set.
    pub train_rows: usize,
    /// Rows in the test set.
    pub test_rows: usize,
    /// Positive share of the whole dataset.
    pub positive_share: f64,
    /// Positive share of the training set.
    pub train_positive_share: f64,
    /// Positive share of the test set.
    pub test_positive_share: f64,
}

/// Partitions `dataset` so that about `ratio` of each outcome class lands in
/// training. Within a class, rows are shuffled by a `StdRng` seeded with
/// `seed` and the first `round(n * ratio)` go to training, so a given seed and
/// input order always reproduce the same partition.
pub fn stratified_split(dataset: &Dataset, ratio: f64, seed: u64) -> Result<Split> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(ChurnError::InvalidConfig(format!(
            "split ratio must be in (0, 1), got {ratio}"
        )));
    }
    if dataset.is_empty() {
        return Err(ChurnError::InvalidConfig("cannot split an empty dataset".into()));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(dataset.len());
    let mut test = Vec::with_capacity(dataset.len());
    for class in [Class::Positive, Class::Negative] {
        let mut stratum: Vec<usize> = dataset
            .outcome
            .values
            .iter()
            .enumerate()
            .filter(|&(_, &value)| value == class)
            .map(|(row, _)| row)
            .collect();
        stratum.shuffle(&mut rng);
        let n_train = (stratum.len() as f64 * ratio).round() as usize;
        train.extend_from_slice(&stratum[..n_train]);
        test.extend_from_slice(&stratum[n_train..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    Ok(Split {
        train,
        test,
        ratio,
        seed,
    })
}

impl Split {
    /// Training row indices, ascending.
    #[must_use]
    pub fn train_indices(&self) -> &[usize] {
        &self.train
    }

    /// Test row indices, ascending.
    #[must_use]
    pub fn test_indices(&self) -> &[usize] {
        &self.test
    }

    /// Configured training share.
    #[must_use]
    pub const fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Seed the split was drawn with.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Copies the training rows out of `dataset`.
    #[must_use]
    pub fn training(&self, dataset: &Dataset) -> Dataset {
        dataset.take(&self.train)
    }

    /// Copies the test rows out of `dataset`.
    #[must_use]
    pub fn testing(&self, dataset: &Dataset) -> Dataset {
        dataset.take(&self.test)
    }

    /// Sizes and class shares of both sides.
    #[must_use]
    pub fn summary(&self, dataset: &Dataset) -> SplitSummary {
        let share = |rows: &[usize]| {
            if rows.is_empty() {
                return f64::NAN;
            }
            let positives = rows
                .iter()
                .filter(|&&row| dataset.outcome.values[row] == Class::Positive)
                .count();
            positives as f64 / rows.len() as f64
        };
        SplitSummary {
            train_rows: self.train.len(),
            test_rows: self.test.len(),
            positive_share: dataset.outcome.positive_share(),
            train_positive_share: share(&self.train),
            test_positive_share: share(&self.test),
        }
    }
}
