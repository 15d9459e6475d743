use serde::{Deserialize, Serialize};

/// Model output paired with the true label of the same row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPair {
    /// Predicted value.
    pub prediction: f64,
    /// True label.
    pub label: f64,
}

impl PredictionPair {
    /// Creates a pair.
    #[must_use]
    pub const fn new(prediction: f64, label: f64) -> Self {
        Self { prediction, label }
    }
}

/// Summary metrics over prediction pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Rows scored.
    pub count: usize,
    /// Share of rows where prediction equals label exactly.
    pub accuracy: f64,
    /// Mean squared error.
    pub mean_squared_error: f64,
    /// Square root of the MSE.
    pub root_mean_squared_error: f64,
}

impl EvaluationReport {
    /// Computes metrics; an empty slice yields zeroes.
    #[must_use]
    pub fn from_pairs(pairs: &[PredictionPair]) -> Self {
        if pairs.is_empty() {
            return Self {
                count: 0,
                accuracy: 0.0,
                mean_squared_error: 0.0,
                root_mean_squared_error: 0.0,
            };
        }
        let count = pairs.len() as f64;
        let hits = pairs
            .iter()
            .filter(|pair| pair.prediction == pair.label)
            .count() as f64;
        let mse = pairs
            .iter()
            .map(|pair| (pair.prediction - pair.label).powi(2))
            .sum::<f64>()
            / count;
        Self {
            count: pairs.len(),
            accuracy: hits / count,
            mean_squared_error: mse,
            root_mean_squared_error: mse.sqrt(),
        }
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "rows={} accuracy={:.4} mse={:.4} rmse={:.4}",
            self.count, self.accuracy, self.mean_squared_error, self.root_mean_squared_error
        )
    }
}
