use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::errors::DatasetError;

/// Single labelled example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledPoint {
    /// Feature vector.
    pub features: Vec<f64>,
    /// Numeric label (class index for classifiers).
    pub label: f64,
}

impl LabeledPoint {
    /// Creates a point.
    #[must_use]
    pub fn new(features: Vec<f64>, label: f64) -> Self {
        Self { features, label }
    }
}

/// Ordered collection of labelled examples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Rows in insertion order.
    pub points: Vec<LabeledPoint>,
}

/// One cross-validation split: the held-out rows and their complement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    /// Position of this fold.
    pub index: usize,
    /// Rows used for training, ascending.
    pub train_indices: Vec<usize>,
    /// Held-out rows, ascending.
    pub validation_indices: Vec<usize>,
}

impl Dataset {
    /// Wraps existing points.
    #[must_use]
    pub fn new(points: Vec<LabeledPoint>) -> Self {
        Self { points }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Feature width of the first row, zero when empty.
    #[must_use]
    pub fn feature_dim(&self) -> usize {
        self.points.first().map_or(0, |point| point.features.len())
    }

    /// Checks the dataset is non-empty and every row has the same width.
    pub fn validate(&self) -> Result<usize, DatasetError> {
        let expected = self
            .points
            .first()
            .map(|point| point.features.len())
            .ok_or(DatasetError::Empty)?;
        for (row, point) in self.points.iter().enumerate() {
            if point.features.len() != expected {
                return Err(DatasetError::RaggedRow {
                    row,
                    expected,
                    found: point.features.len(),
                });
            }
        }
        Ok(expected)
    }

    /// Labels in row order.
    #[must_use]
    pub fn labels(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.label).collect()
    }

    /// Feature vectors in row order.
    #[must_use]
    pub fn features(&self) -> Vec<&[f64]> {
        self.points
            .iter()
            .map(|point| point.features.as_slice())
            .collect()
    }

    /// Copies the given rows, in the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, DatasetError> {
        let rows = self.len();
        indices
            .iter()
            .map(|&index| {
                self.points
                    .get(index)
                    .cloned()
                    .ok_or(DatasetError::IndexOutOfRange { index, rows })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// Rescales every feature to zero mean and unit variance.
    pub fn standardize(&mut self) {
        if self.points.is_empty() {
            return;
        }
        let count = self.points.len() as f64;
        let feature_dim = self.feature_dim();
        let mut means = vec![0.0; feature_dim];
        for point in &self.points {
            for (idx, value) in point.features.iter().enumerate().take(feature_dim) {
                means[idx] += value;
            }
        }
        for mean in &mut means {
            *mean /= count;
        }

        let mut deviations = vec![0.0; feature_dim];
        for point in &self.points {
            for (idx, value) in point.features.iter().enumerate().take(feature_dim) {
                deviations[idx] += (value - means[idx]).powi(2);
            }
        }
        for deviation in &mut deviations {
            *deviation = (*deviation / count).sqrt().max(1e-9);
        }

        for point in &mut self.points {
            for (idx, value) in point.features.iter_mut().enumerate().take(feature_dim) {
                *value = (*value - means[idx]) / deviations[idx];
            }
        }
    }

    /// Splits rows into `folds` held-out sets.
    ///
    /// Rows are shuffled with `seed` and dealt into contiguous chunks whose
    /// sizes differ by at most one, so every row is held out exactly once and
    /// the same seed always reproduces the same assignment.
    pub fn k_fold(&self, folds: usize, seed: u64) -> Result<Vec<Fold>, DatasetError> {
        let rows = self.len();
        if rows == 0 {
            return Err(DatasetError::Empty);
        }
        if folds < 2 || folds >= rows {
            return Err(DatasetError::InvalidFoldCount { folds, rows });
        }

        let mut order: Vec<usize> = (0..rows).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let base = rows / folds;
        let extra = rows % folds;
        let mut assignment = vec![0_usize; rows];
        let mut cursor = 0;
        for fold in 0..folds {
            let size = base + usize::from(fold < extra);
            for &row in &order[cursor..cursor + size] {
                assignment[row] = fold;
            }
            cursor += size;
        }

        Ok((0..folds)
            .map(|fold| {
                let (validation_indices, train_indices): (Vec<usize>, Vec<usize>) =
                    (0..rows).partition(|&row| assignment[row] == fold);
                Fold {
                    index: fold,
                    train_indices,
                    validation_indices,
                }
            })
            .collect())
    }

    /// Generates a reproducible classification dataset.
    ///
    /// Labels are `0..classes`, assigned by bucketing the mean feature value,
    /// with a little label-independent noise on the features.
    #[must_use]
    pub fn synthetic_classification(count: usize, feature_dim: usize, classes: usize, seed: u64) -> Self {
        let classes = classes.max(2);
        let feature_dim = feature_dim.max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let features: Vec<f64> = (0..feature_dim)
                .map(|_| rng.gen_range(-1.0..1.0))
                .collect();
            let mean = features.iter().sum::<f64>() / feature_dim as f64;
            let bucket = ((mean + 1.0) / 2.0 * classes as f64).floor();
            let label = bucket.clamp(0.0, (classes - 1) as f64);
            let noisy = features
                .into_iter()
                .map(|value| value + rng.gen_range(-0.05..0.05))
                .collect();
            points.push(LabeledPoint::new(noisy, label));
        }
        Self { points }
    }

    /// Splits off the trailing `test_ratio` share of rows.
    #[must_use]
    pub fn train_test_split(&self, test_ratio: f64) -> (Self, Self) {
        let split =
            ((1.0 - test_ratio.clamp(0.0, 1.0)) * self.len() as f64).round() as usize;
        let (train, test) = self.points.split_at(split.min(self.len()));
        (Self::new(train.to_vec()), Self::new(test.to_vec()))
    }
}
