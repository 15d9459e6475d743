use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{network::Network, params::DeepLearningParameters};
use crate::errors::DeepLearningError;

/// Classification metrics over one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetrics {
    /// Rows scored.
    pub rows: usize,
    /// Share of rows whose most probable level is wrong.
    pub classification_error: f64,
    /// Mean negative log probability of the true level.
    pub logloss: f64,
}

impl ScoreMetrics {
    /// Whether `self` beats `other`: lower error first, then lower logloss.
    #[must_use]
    pub fn better_than(&self, other: &Self) -> bool {
        self.classification_error < other.classification_error
            || (self.classification_error == other.classification_error
                && self.logloss < other.logloss)
    }
}

/// One scoring round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRecord {
    /// Iteration after which scoring ran, starting at 1.
    pub iteration: usize,
    /// Training samples processed so far.
    pub samples: u64,
    /// `samples / train_rows`.
    pub epochs: f64,
    /// Wall time since training started.
    pub elapsed_secs: f64,
    /// When the round ran.
    pub timestamp: DateTime<Utc>,
    /// Metrics on sampled training rows.
    pub training: ScoreMetrics,
    /// Metrics on the validation frame; absent when it has no rows.
    pub validation: Option<ScoreMetrics>,
    /// Mean absolute weight per layer, when diagnostics are on.
    pub weight_magnitudes: Option<Vec<f64>>,
}

impl ScoringRecord {
    /// Validation metrics when present, training metrics otherwise.
    #[must_use]
    pub fn selection_metrics(&self) -> &ScoreMetrics {
        self.validation.as_ref().unwrap_or(&self.training)
    }
}

/// Trained deep learning classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepLearningModel {
    pub(crate) network: Network,
    pub(crate) parameters: DeepLearningParameters,
    pub(crate) input_columns: Vec<String>,
    pub(crate) levels: Vec<f64>,
    pub(crate) history: Vec<ScoringRecord>,
    pub(crate) best_iteration: usize,
    pub(crate) samples_trained: u64,
}

impl DeepLearningModel {
    /// `dl_<id>_model`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.parameters.model_id
    }

    /// Parameters the model was trained with.
    #[must_use]
    pub const fn parameters(&self) -> &DeepLearningParameters {
        &self.parameters
    }

    /// Response column name.
    #[must_use]
    pub fn response_column(&self) -> &str {
        &self.parameters.response_column
    }

    /// Input column names, in frame order.
    #[must_use]
    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    /// Response levels; output `k` predicts `levels[k]`.
    #[must_use]
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Scoring rounds in order.
    #[must_use]
    pub fn history(&self) -> &[ScoringRecord] {
        &self.history
    }

    /// Iteration whose snapshot the model holds.
    #[must_use]
    pub const fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    /// Training samples processed.
    #[must_use]
    pub const fn samples_trained(&self) -> u64 {
        self.samples_trained
    }

    /// Underlying network.
    #[must_use]
    pub const fn network(&self) -> &Network {
        &self.network
    }

    /// Probability of every level for one row.
    pub fn probabilities(&self, inputs: &[f64]) -> Result<Vec<f64>, DeepLearningError> {
        let expected = self.network.input_width();
        if inputs.len() != expected {
            return Err(DeepLearningError::InputWidthMismatch {
                expected,
                found: inputs.len(),
            });
        }
        Ok(self.network.probabilities(inputs))
    }

    /// Most probable level index; ties go to the lowest index.
    pub fn predict_level(&self, inputs: &[f64]) -> Result<usize, DeepLearningError> {
        Ok(argmax(&self.probabilities(inputs)?))
    }

    /// Most probable level mapped back to its numeric label.
    pub fn predict(&self, inputs: &[f64]) -> Result<f64, DeepLearningError> {
        let level = self.predict_level(inputs)?;
        Ok(self.levels.get(level).copied().unwrap_or(f64::NAN))
    }
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_value), (idx, value)| {
            if *value > best_value {
                (idx, *value)
            } else {
                (best, best_value)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(classification_error: f64, logloss: f64) -> ScoreMetrics {
        ScoreMetrics {
            rows: 10,
            classification_error,
            logloss,
        }
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5]), 1);
        assert_eq!(argmax(&[0.9]), 0);
    }

    #[test]
    fn metric_ordering() {
        assert!(metrics(0.1, 0.9).better_than(&metrics(0.2, 0.1)));
        assert!(metrics(0.1, 0.3).better_than(&metrics(0.1, 0.4)));
        assert!(!metrics(0.1, 0.4).better_than(&metrics(0.1, 0.4)));
    }

    #[test]
    fn selection_falls_back_to_training() {
        let record = ScoringRecord {
            iteration: 1,
            samples: 10,
            epochs: 1.0,
            elapsed_secs: 0.0,
            timestamp: Utc::now(),
            training: metrics(0.3, 0.5),
            validation: None,
            weight_magnitudes: None,
        };
        assert_eq!(record.selection_metrics(), &metrics(0.3, 0.5));
        let with_valid = ScoringRecord {
            validation: Some(metrics(0.1, 0.2)),
            ..record
        };
        assert_eq!(with_valid.selection_metrics().classification_error, 0.1);
    }
}
