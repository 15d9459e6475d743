#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Stacked ensembles over a name-keyed model builder, and a deep learning
//! classifier backed by a scoped frame store.

/// Labelled datasets and k-fold assignment.
#[path = "../dataset.rs"]
pub mod dataset;

/// Error types for every unit.
#[path = "../errors.rs"]
pub mod errors;

/// Explicit configuration and the execution context.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Prediction pairs and summary metrics.
#[path = "../evaluation.rs"]
pub mod evaluation;

/// Per-column summary statistics.
#[path = "../summary.rs"]
pub mod summary;

/// Built-in learners and the model builder.
#[path = "../algorithms/main.rs"]
pub mod algorithms;

/// Stacking coordinator.
#[path = "../stacking/main.rs"]
pub mod stacking;

/// Deep learning classifier.
#[path = "../deep_learning/main.rs"]
pub mod deep_learning;

pub use algorithms::{
    Algorithm, AlgorithmRegistry, HyperParameters, Learner, ModelBuilder, Predictor, TrainedModel,
};
pub use config::{MlContext, MlCoreConfig};
pub use dataset::{Dataset, Fold, LabeledPoint};
pub use deep_learning::{
    DeepLearningClassifier, DeepLearningModel, FrameKey, FrameStore, TrainingRequest,
};
pub use errors::{
    ConfigError, DatasetError, DeepLearningError, FrameError, ModelBuilderError,
    ModelHandlerError,
};
pub use evaluation::{EvaluationReport, PredictionPair};
pub use stacking::{EnsembleSpec, Stacking};
pub use summary::DatasetSummary;
pub use telemetry::{MlTelemetry, MlTelemetryBuilder};
