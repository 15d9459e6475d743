use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use super::store::FrameKey;
use crate::{config::DeepLearningSettings, errors::DeepLearningError};

/// Hidden-layer nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// `max(0, x)`.
    Rectifier,
    /// `max(0, x)` with dropout during training.
    RectifierWithDropout,
    /// Hyperbolic tangent.
    Tanh,
}

impl Activation {
    /// Whether hidden dropout applies while training.
    #[must_use]
    pub const fn uses_dropout(self) -> bool {
        matches!(self, Self::RectifierWithDropout)
    }

    pub(crate) fn apply(self, z: f64) -> f64 {
        match self {
            Self::Rectifier | Self::RectifierWithDropout => z.max(0.0),
            Self::Tanh => z.tanh(),
        }
    }

    /// Derivative expressed through the activation output.
    pub(crate) fn derivative(self, activated: f64) -> f64 {
        match self {
            Self::Rectifier | Self::RectifierWithDropout => {
                if activated > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Tanh => 1.0 - activated * activated,
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rectifier => "Rectifier",
            Self::RectifierWithDropout => "RectifierWithDropout",
            Self::Tanh => "Tanh",
        };
        f.write_str(name)
    }
}

/// Full parameter set for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepLearningParameters {
    /// `dl_<id>_model`.
    pub model_id: String,
    /// Training frame key.
    pub train: FrameKey,
    /// Validation frame key.
    pub valid: FrameKey,
    /// Response column name.
    pub response_column: String,
    /// Hidden layer sizes.
    pub hidden: Vec<usize>,
    /// Hidden-layer nonlinearity.
    pub activation: Activation,
    /// Samples processed between scoring checks.
    pub train_samples_per_iteration: usize,
    /// Input dropout.
    pub input_dropout_ratio: f64,
    /// Hidden dropout.
    pub hidden_dropout_ratio: f64,
    /// L1 penalty.
    pub l1: f64,
    /// Max squared incoming weight sum per neuron.
    pub max_w2: f64,
    /// Passes over the training frame.
    pub epochs: usize,
    /// ADADELTA when true, fixed `rate` otherwise.
    pub adaptive_rate: bool,
    /// ADADELTA decay.
    pub rho: f64,
    /// ADADELTA smoothing.
    pub epsilon: f64,
    /// Learning rate when `adaptive_rate` is off.
    pub rate: f64,
    /// Keep the best-scoring snapshot instead of the last one.
    pub overwrite_with_best_model: bool,
    /// Record per-layer weight magnitudes at every scoring round.
    pub diagnostics: bool,
    /// Stop once validation error is at or below this; negative disables.
    pub classification_stop: f64,
    /// Minimum wall time between intermediate scoring rounds.
    pub score_interval: Duration,
    /// Training rows sampled for training metrics.
    pub score_training_samples: usize,
    /// RNG seed.
    pub seed: u64,
}

impl DeepLearningParameters {
    /// Parameters for the classifier, with fixed settings taken from configuration.
    #[must_use]
    pub fn new(
        model_id: u64,
        train: FrameKey,
        valid: FrameKey,
        response_column: impl Into<String>,
        request: &TrainingRequest,
        settings: &DeepLearningSettings,
    ) -> Self {
        Self {
            model_id: model_key(model_id),
            train,
            valid,
            response_column: response_column.into(),
            hidden: request.layer_sizes.clone(),
            activation: Activation::RectifierWithDropout,
            train_samples_per_iteration: request.batch_size,
            input_dropout_ratio: settings.input_dropout_ratio,
            hidden_dropout_ratio: settings.hidden_dropout_ratio,
            l1: settings.l1,
            max_w2: settings.max_w2,
            epochs: request.epochs,
            adaptive_rate: true,
            rho: settings.rho,
            epsilon: settings.epsilon,
            rate: 0.005,
            overwrite_with_best_model: true,
            diagnostics: false,
            classification_stop: -1.0,
            score_interval: Duration::try_from_secs_f64(settings.score_interval_secs)
                .unwrap_or_default(),
            score_training_samples: request.batch_size,
            seed: settings.seed,
        }
    }
}

/// Model key for a numeric id.
#[must_use]
pub fn model_key(model_id: u64) -> String {
    format!("dl_{model_id}_model")
}

/// Caller-supplied arguments of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    /// Numeric model id, used for `dl_<id>_model` and frame keys.
    pub model_id: u64,
    /// Samples per iteration and training-metric sample size.
    pub batch_size: usize,
    /// Hidden layer sizes.
    pub layer_sizes: Vec<usize>,
    /// Passes over the training split.
    pub epochs: usize,
    /// Share of rows used for training; the rest validate.
    pub train_fraction: f64,
    /// Response column; empty means the last column.
    pub response_column: String,
}

impl TrainingRequest {
    /// Request with the given id and hidden layers; one epoch, batch of 10,
    /// 80% training split, default response column.
    #[must_use]
    pub fn new(model_id: u64, layer_sizes: Vec<usize>) -> Self {
        Self {
            model_id,
            batch_size: 10,
            layer_sizes,
            epochs: 1,
            train_fraction: 0.8,
            response_column: String::new(),
        }
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the epoch count.
    #[must_use]
    pub const fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Sets the training share.
    #[must_use]
    pub fn with_train_fraction(mut self, train_fraction: f64) -> Self {
        self.train_fraction = train_fraction;
        self
    }

    /// Sets the response column.
    #[must_use]
    pub fn with_response_column(mut self, column: impl Into<String>) -> Self {
        self.response_column = column.into();
        self
    }

    /// Checks arguments before any data is touched.
    pub fn validate(&self) -> Result<(), DeepLearningError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be positive"));
        }
        if self.epochs == 0 {
            return Err(invalid("epochs", "must be positive"));
        }
        if self.layer_sizes.is_empty() {
            return Err(invalid("layer_sizes", "need at least one hidden layer"));
        }
        if self.layer_sizes.contains(&0) {
            return Err(invalid("layer_sizes", "layer sizes must be positive"));
        }
        let fraction = self.train_fraction;
        if fraction.is_nan() || fraction <= 0.0 || fraction > 1.0 {
            return Err(DeepLearningError::InvalidArgument {
                name: "train_fraction",
                reason: format!("{} must be in (0, 1]", self.train_fraction),
            });
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> DeepLearningError {
    DeepLearningError::InvalidArgument {
        name,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_follow_request_and_settings() {
        let request = TrainingRequest::new(7, vec![16, 8]).with_batch_size(25).with_epochs(3);
        let params = DeepLearningParameters::new(
            7,
            FrameKey::new("t"),
            FrameKey::new("v"),
            "C5",
            &request,
            &DeepLearningSettings::default(),
        );
        assert_eq!(params.model_id, "dl_7_model");
        assert_eq!(params.train_samples_per_iteration, 25);
        assert_eq!(params.score_training_samples, 25);
        assert_eq!(params.hidden, vec![16, 8]);
        assert_eq!(params.activation, Activation::RectifierWithDropout);
        assert!(params.adaptive_rate && params.overwrite_with_best_model && !params.diagnostics);
        assert!(params.classification_stop < 0.0);
        assert_eq!(params.score_interval, Duration::from_secs(60));
        assert_eq!(params.seed, 999_999_999);
    }

    #[test]
    fn request_validation() {
        let ok = TrainingRequest::new(1, vec![4]);
        assert!(ok.validate().is_ok());
        for bad in [
            ok.clone().with_batch_size(0),
            ok.clone().with_epochs(0),
            ok.clone().with_train_fraction(0.0),
            ok.clone().with_train_fraction(1.5),
            TrainingRequest::new(1, vec![]),
            TrainingRequest::new(1, vec![4, 0]),
        ] {
            assert!(matches!(
                bad.validate(),
                Err(DeepLearningError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn activations() {
        assert_eq!(Activation::Rectifier.apply(-2.0), 0.0);
        assert_eq!(Activation::RectifierWithDropout.derivative(3.0), 1.0);
        assert!((Activation::Tanh.derivative(0.0) - 1.0).abs() < 1e-12);
        assert!(!Activation::Tanh.uses_dropout());
        assert_eq!(Activation::RectifierWithDropout.to_string(), "RectifierWithDropout");
    }
}
