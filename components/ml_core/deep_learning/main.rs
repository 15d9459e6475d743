//! Deep learning classifier: frames the data, keeps intermediate frames in a
//! scoped store, and trains a dropout MLP with ADADELTA.

/// Columnar frames.
pub mod frame;
/// Trained model and scoring history.
pub mod model;
/// Dense network and its update rule.
pub mod network;
/// Run parameters and caller requests.
pub mod params;
/// Frame store with scoped key tracking.
pub mod store;
mod trainer;

use ml_logging::LogLevel;
use serde_json::json;

pub use frame::Frame;
pub use model::{DeepLearningModel, ScoreMetrics, ScoringRecord};
pub use params::{Activation, DeepLearningParameters, TrainingRequest};
pub use store::{FrameKey, FrameStore, Scope};

use crate::{
    config::MlContext,
    dataset::Dataset,
    errors::{DeepLearningError, FrameError},
    evaluation::PredictionPair,
    telemetry,
};

/// Stateless entry point for deep learning training and scoring.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeepLearningClassifier;

impl DeepLearningClassifier {
    /// Creates a classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Trains a model. Every failure is logged, published as `ml.deep.failed`
    /// and returned; frames created along the way are released either way.
    pub fn train(
        &self,
        ctx: &MlContext,
        data: &Dataset,
        request: &TrainingRequest,
    ) -> Result<DeepLearningModel, DeepLearningError> {
        let tel = ctx.telemetry();
        telemetry::log(
            tel,
            LogLevel::Info,
            "deep_learning_train_start",
            json!({
                "model_id": request.model_id,
                "rows": data.len(),
                "layers": request.layer_sizes,
                "epochs": request.epochs,
                "batch_size": request.batch_size,
            }),
        );
        match Self::run_training(ctx, data, request) {
            Ok(model) => {
                let final_metrics = model
                    .history()
                    .iter()
                    .find(|record| record.iteration == model.best_iteration())
                    .map(|record| *record.selection_metrics());
                telemetry::log(
                    tel,
                    LogLevel::Info,
                    "deep_learning_train_complete",
                    json!({
                        "model_id": model.id(),
                        "samples": model.samples_trained(),
                        "scoring_rounds": model.history().len(),
                        "best_iteration": model.best_iteration(),
                        "classification_error": final_metrics.map(|m| m.classification_error),
                    }),
                );
                telemetry::event(
                    tel,
                    "ml.deep.trained",
                    json!({ "model_id": model.id(), "levels": model.levels().len() }),
                );
                Ok(model)
            }
            Err(err) => {
                telemetry::log(
                    tel,
                    LogLevel::Error,
                    "deep_learning_train_failed",
                    json!({ "model_id": request.model_id, "error": err.to_string() }),
                );
                telemetry::event(
                    tel,
                    "ml.deep.failed",
                    json!({ "model_id": request.model_id, "error": err.to_string() }),
                );
                Err(err)
            }
        }
    }

    fn run_training(
        ctx: &MlContext,
        data: &Dataset,
        request: &TrainingRequest,
    ) -> Result<DeepLearningModel, DeepLearningError> {
        request.validate()?;
        let settings = &ctx.config().deep_learning;
        let frame = Frame::from_dataset(data)?;
        let mut frame = frame.shuffle_per_chunk(settings.seed, settings.chunk_rows);

        let response_column = if request.response_column.is_empty() {
            frame
                .names()
                .last()
                .map(|name| (*name).to_string())
                .unwrap_or_default()
        } else {
            request.response_column.clone()
        };
        let response = frame
            .find(&response_column)
            .ok_or_else(|| FrameError::UnknownColumn(response_column.clone()))?;
        // both splits share one level set
        let levels = frame.to_categorical(response)?.len();
        if levels < 2 {
            return Err(DeepLearningError::DegenerateResponse {
                column: response_column,
                levels,
            });
        }
        let (train_frame, valid_frame) = frame.split(request.train_fraction)?;

        let store = ctx.store();
        let mut scope = store.scope();
        let train_key = scope.put(
            FrameKey::new(format!("dl_{}_train", request.model_id)),
            train_frame,
        )?;
        let valid_key = scope.put(
            FrameKey::new(format!("dl_{}_valid", request.model_id)),
            valid_frame,
        )?;
        let params = DeepLearningParameters::new(
            request.model_id,
            train_key,
            valid_key,
            response_column,
            request,
            settings,
        );
        let train_frame = store
            .get(&params.train)
            .ok_or_else(|| FrameError::MissingFrame(params.train.to_string()))?;
        let valid_frame = store
            .get(&params.valid)
            .ok_or_else(|| FrameError::MissingFrame(params.valid.to_string()))?;
        trainer::train(params, &train_frame, &valid_frame, ctx.telemetry())
    }

    /// Scores `data` with `model`, pairing each prediction with the row's true
    /// response value. Empty input gives empty output.
    pub fn test(
        &self,
        ctx: &MlContext,
        model: &DeepLearningModel,
        data: &Dataset,
    ) -> Result<Vec<PredictionPair>, DeepLearningError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let frame = Frame::from_dataset(data)?;
        let store = ctx.store();
        let mut scope = store.scope();
        let key = scope.put(FrameKey::unique(&format!("{}_test", model.id())), frame)?;
        let frame = store
            .get(&key)
            .ok_or_else(|| FrameError::MissingFrame(key.to_string()))?;
        let expected = model.input_columns().len();
        if frame.num_cols() != expected + 1 {
            return Err(DeepLearningError::InputWidthMismatch {
                expected,
                found: frame.num_cols().saturating_sub(1),
            });
        }

        let response = frame
            .find(model.response_column())
            .ok_or_else(|| FrameError::UnknownColumn(model.response_column().to_string()))?;
        let labels = frame.column(response)?.values();
        let features = frame.without_column(response)?;

        let pairs = (0..features.num_rows())
            .map(|row| {
                model
                    .predict(&features.row(row))
                    .map(|prediction| PredictionPair::new(prediction, labels[row]))
            })
            .collect::<Result<Vec<_>, _>>()?;
        telemetry::log(
            ctx.telemetry(),
            LogLevel::Info,
            "deep_learning_test_complete",
            json!({ "model_id": model.id(), "rows": pairs.len() }),
        );
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{MlContext, MlCoreConfig},
        dataset::LabeledPoint,
        errors::DatasetError,
        telemetry::MlTelemetry,
    };
    use ml_events::MemoryEventBus;
    use ml_logging::MemoryLogSink;

    fn separable(rows: usize) -> Dataset {
        Dataset::new(
            (0..rows)
                .map(|idx| {
                    let class = idx % 2;
                    let offset = if class == 0 { -2.0 } else { 2.0 };
                    let jitter = (idx % 7) as f64 * 0.05;
                    LabeledPoint::new(vec![offset + jitter, offset - jitter], class as f64 * 5.0)
                })
                .collect(),
        )
    }

    fn request() -> TrainingRequest {
        TrainingRequest::new(42, vec![8, 4])
            .with_batch_size(20)
            .with_epochs(20)
            .with_train_fraction(0.8)
    }

    #[test]
    fn trains_and_predicts_original_labels() {
        let mut config = MlCoreConfig::default();
        config.deep_learning.epsilon = 1e-6;
        config.deep_learning.hidden_dropout_ratio = 0.2;
        let ctx = MlContext::new(config);
        let classifier = DeepLearningClassifier::new();
        let data = separable(100);
        let model = classifier
            .train(&ctx, &data, &request().with_epochs(50))
            .unwrap();
        assert_eq!(model.id(), "dl_42_model");
        assert_eq!(model.response_column(), "C3");
        assert_eq!(model.levels(), &[0.0, 5.0]);
        assert!(!model.history().is_empty());

        let pairs = classifier.test(&ctx, &model, &data).unwrap();
        assert_eq!(pairs.len(), data.len());
        assert!(pairs
            .iter()
            .all(|pair| pair.prediction == 0.0 || pair.prediction == 5.0));
        let hits = pairs.iter().filter(|pair| pair.prediction == pair.label).count();
        assert!(hits >= 85, "only {hits} correct");
        assert!(ctx.store().is_empty());
    }

    #[test]
    fn frames_are_released_on_failure() {
        let ctx = MlContext::default();
        let data = Dataset::new(
            (0..10)
                .map(|idx| LabeledPoint::new(vec![f64::from(idx)], 1.0))
                .collect(),
        );
        let err = DeepLearningClassifier::new()
            .train(&ctx, &data, &request())
            .unwrap_err();
        assert!(matches!(err, DeepLearningError::DegenerateResponse { levels: 1, .. }));
        assert!(ctx.store().is_empty());

        // the split leaves no training rows, after both frames were stored
        let err = DeepLearningClassifier::new()
            .train(&ctx, &separable(10), &request().with_train_fraction(0.01))
            .unwrap_err();
        assert!(matches!(err, DeepLearningError::Dataset(DatasetError::Empty)));
        assert!(ctx.store().is_empty());
    }

    #[test]
    fn concurrent_run_with_same_id_is_rejected() {
        let ctx = MlContext::default();
        let data = separable(20);
        let held = FrameKey::new("dl_42_valid");
        ctx.store()
            .put(held.clone(), Frame::from_dataset(&data).unwrap());

        let err = DeepLearningClassifier::new()
            .train(&ctx, &data, &request())
            .unwrap_err();
        assert!(matches!(
            err,
            DeepLearningError::Frame(FrameError::KeyInUse(key)) if key == "dl_42_valid"
        ));
        assert_eq!(ctx.store().keys(), vec![held]);
    }

    #[test]
    fn explicit_errors() {
        let ctx = MlContext::default();
        let classifier = DeepLearningClassifier::new();
        let data = separable(20);
        assert!(matches!(
            classifier.train(&ctx, &Dataset::default(), &request()),
            Err(DeepLearningError::Dataset(DatasetError::Empty))
        ));
        assert!(matches!(
            classifier.train(&ctx, &data, &request().with_response_column("C9")),
            Err(DeepLearningError::Frame(FrameError::UnknownColumn(name))) if name == "C9"
        ));
        assert!(matches!(
            classifier.train(&ctx, &data, &request().with_epochs(0)),
            Err(DeepLearningError::InvalidArgument { name: "epochs", .. })
        ));
        assert!(matches!(
            classifier.train(&ctx, &data, &request().with_train_fraction(1.2)),
            Err(DeepLearningError::InvalidArgument { name: "train_fraction", .. })
        ));
    }

    #[test]
    fn other_response_column() {
        let ctx = MlContext::default();
        let data = Dataset::new(
            (0..40)
                .map(|idx| {
                    let class = f64::from(idx % 2);
                    LabeledPoint::new(vec![class, class * 3.0 - 1.0], 0.5)
                })
                .collect(),
        );
        let classifier = DeepLearningClassifier::new();
        let model = classifier
            .train(&ctx, &data, &request().with_response_column("C1"))
            .unwrap();
        assert_eq!(model.input_columns(), &["C2", "C3"]);
        let pairs = classifier.test(&ctx, &model, &data).unwrap();
        assert_eq!(pairs[1].label, 1.0);
    }

    #[test]
    fn full_training_share_has_no_validation() {
        let ctx = MlContext::default();
        let model = DeepLearningClassifier::new()
            .train(&ctx, &separable(30), &request().with_train_fraction(1.0).with_epochs(1))
            .unwrap();
        assert!(model.history().iter().all(|record| record.validation.is_none()));
    }

    #[test]
    fn empty_test_input() {
        let ctx = MlContext::default();
        let classifier = DeepLearningClassifier::new();
        let model = classifier.train(&ctx, &separable(20), &request()).unwrap();
        assert!(classifier.test(&ctx, &model, &Dataset::default()).unwrap().is_empty());
        let narrow = Dataset::new(vec![LabeledPoint::new(vec![1.0, 2.0, 3.0], 0.0)]);
        assert!(classifier.test(&ctx, &model, &narrow).is_err());
    }

    #[test]
    fn failures_are_logged_and_published() {
        let sink = Arc::new(MemoryLogSink::new(32));
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = MlTelemetry::builder("deep_learning")
            .sink(sink.clone())
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let ctx = MlContext::new(MlCoreConfig::default()).with_telemetry(telemetry);
        let classifier = DeepLearningClassifier::new();
        assert!(classifier
            .train(&ctx, &separable(20), &request().with_batch_size(0))
            .is_err());
        let failed = sink.find("deep_learning_train_failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(bus.of_type("ml.deep.failed").len(), 1);

        classifier.train(&ctx, &separable(20), &request()).unwrap();
        assert_eq!(bus.of_type("ml.deep.trained").len(), 1);
        assert!(!bus.of_type("ml.deep.scored").is_empty());
    }
}
