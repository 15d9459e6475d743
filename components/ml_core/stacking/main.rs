//! Stacked generalisation: base learners feed out-of-fold predictions to a meta learner.

/// Out-of-fold prediction matrix.
pub mod level_one;

use ml_logging::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    algorithms::{HyperParameters, ModelBuilder, TrainedModel},
    config::MlContext,
    dataset::Dataset,
    errors::ModelHandlerError,
    evaluation::PredictionPair,
    telemetry::{event, log},
};
use level_one::PredictionMatrix;

/// What to train: base learners, the meta learner and the fold layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleSpec {
    /// Base algorithm names, one ensemble column each.
    pub base_algorithms: Vec<String>,
    /// Hyperparameters per base algorithm, same order.
    pub base_params: Vec<HyperParameters>,
    /// Meta algorithm name.
    pub meta_algorithm: String,
    /// Meta hyperparameters.
    pub meta_params: HyperParameters,
    /// Cross-validation folds.
    pub num_folds: usize,
    /// Fold assignment seed.
    pub seed: u64,
}

impl EnsembleSpec {
    /// Spec with default hyperparameters and the context's fold settings.
    #[must_use]
    pub fn new<I, S>(ctx: &MlContext, base_algorithms: I, meta_algorithm: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let base_algorithms: Vec<String> = base_algorithms.into_iter().map(Into::into).collect();
        let base_params = vec![HyperParameters::new(); base_algorithms.len()];
        Self {
            base_algorithms,
            base_params,
            meta_algorithm: meta_algorithm.into(),
            meta_params: HyperParameters::new(),
            num_folds: ctx.config().stacking.num_folds,
            seed: ctx.config().stacking.seed,
        }
    }

    /// Overrides the fold count.
    #[must_use]
    pub const fn with_folds(mut self, num_folds: usize) -> Self {
        self.num_folds = num_folds;
        self
    }

    /// Overrides the seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Replaces the hyperparameters of base learner `index`, if it exists.
    #[must_use]
    pub fn with_base_params(mut self, index: usize, params: HyperParameters) -> Self {
        if let Some(slot) = self.base_params.get_mut(index) {
            *slot = params;
        }
        self
    }

    /// Replaces the meta learner's hyperparameters.
    #[must_use]
    pub fn with_meta_params(mut self, params: HyperParameters) -> Self {
        self.meta_params = params;
        self
    }

    fn validate(&self, rows: usize) -> Result<(), ModelHandlerError> {
        if self.base_algorithms.is_empty() {
            return Err(ModelHandlerError::EmptyBaseModels);
        }
        if self.base_params.len() != self.base_algorithms.len() {
            return Err(ModelHandlerError::ParameterMismatch {
                algorithms: self.base_algorithms.len(),
                params: self.base_params.len(),
            });
        }
        if self.num_folds < 2 || self.num_folds >= rows {
            return Err(crate::errors::DatasetError::InvalidFoldCount {
                folds: self.num_folds,
                rows,
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FittedEnsemble {
    base_models: Vec<TrainedModel>,
    meta_model: TrainedModel,
    feature_dim: usize,
    level_one_shape: (usize, usize),
}

/// Stacking ensemble. Fitted state lives as long as the value.
#[derive(Debug, Clone, Default)]
pub struct Stacking {
    fitted: Option<FittedEnsemble>,
}

impl Stacking {
    /// Unfitted ensemble.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `train` has succeeded at least once.
    #[must_use]
    pub const fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    /// Base models trained on the full dataset, in spec order.
    #[must_use]
    pub fn base_models(&self) -> &[TrainedModel] {
        match &self.fitted {
            Some(fitted) => &fitted.base_models,
            None => &[],
        }
    }

    /// Meta model trained on the level-one dataset.
    #[must_use]
    pub fn meta_model(&self) -> Option<&TrainedModel> {
        self.fitted.as_ref().map(|fitted| &fitted.meta_model)
    }

    /// `(rows, base models)` of the level-one dataset from the last fit.
    #[must_use]
    pub fn level_one_shape(&self) -> Option<(usize, usize)> {
        self.fitted.as_ref().map(|fitted| fitted.level_one_shape)
    }

    /// Trains every base learner on the full data and per fold complement,
    /// builds the level-one dataset from out-of-fold predictions and fits the
    /// meta learner on it. A failure leaves any previous fit in place.
    pub fn train(
        &mut self,
        ctx: &MlContext,
        builder: &dyn ModelBuilder,
        data: &Dataset,
        spec: &EnsembleSpec,
    ) -> Result<(), ModelHandlerError> {
        let telemetry = ctx.telemetry();
        let feature_dim = data.validate()?;
        spec.validate(data.len())?;
        let folds = data.k_fold(spec.num_folds, spec.seed)?;
        log(
            telemetry,
            LogLevel::Info,
            "stacking_train_start",
            json!({
                "rows": data.len(),
                "feature_dim": feature_dim,
                "base_algorithms": spec.base_algorithms,
                "meta_algorithm": spec.meta_algorithm,
                "num_folds": spec.num_folds,
                "seed": spec.seed,
            }),
        );

        let mut matrix = PredictionMatrix::new(data.len(), spec.base_algorithms.len());
        let mut base_models = Vec::with_capacity(spec.base_algorithms.len());
        for (column, (algorithm, params)) in spec
            .base_algorithms
            .iter()
            .zip(spec.base_params.iter())
            .enumerate()
        {
            base_models.push(builder.build(algorithm, data, params)?);

            let mut cursor = 0;
            for fold in &folds {
                let train = data.select(&fold.train_indices)?;
                let held_out = data.select(&fold.validation_indices)?;
                let model = builder.build(algorithm, &train, params)?;
                cursor = matrix.fill_column(column, cursor, &model.predict_dataset(&held_out));
                log(
                    telemetry,
                    LogLevel::Debug,
                    "stacking_fold_trained",
                    json!({
                        "algorithm": algorithm,
                        "fold": fold.index,
                        "train_rows": fold.train_indices.len(),
                        "held_out_rows": fold.validation_indices.len(),
                    }),
                );
            }
        }
        debug_assert!(matrix.is_complete());

        let labels: Vec<f64> = folds
            .iter()
            .flat_map(|fold| fold.validation_indices.iter())
            .map(|&row| data.points[row].label)
            .collect();
        let level_one_shape = matrix.shape();
        let level_one = matrix.into_dataset(&labels);
        let meta_model = builder.build(&spec.meta_algorithm, &level_one, &spec.meta_params)?;

        log(
            telemetry,
            LogLevel::Info,
            "stacking_train_complete",
            json!({
                "level_one_rows": level_one_shape.0,
                "level_one_cols": level_one_shape.1,
                "meta_model": meta_model.id(),
            }),
        );
        event(
            telemetry,
            "ml.stacking.trained",
            json!({
                "base_models": base_models.len(),
                "rows": data.len(),
                "num_folds": spec.num_folds,
            }),
        );
        self.fitted = Some(FittedEnsemble {
            base_models,
            meta_model,
            feature_dim,
            level_one_shape,
        });
        Ok(())
    }

    /// Scores `data` through every base model and then the meta model.
    pub fn test(
        &self,
        ctx: &MlContext,
        data: &Dataset,
    ) -> Result<Vec<PredictionPair>, ModelHandlerError> {
        let fitted = self.fitted.as_ref().ok_or(ModelHandlerError::NotTrained)?;
        if let Some(point) = data
            .points
            .iter()
            .find(|point| point.features.len() != fitted.feature_dim)
        {
            return Err(ModelHandlerError::FeatureWidthMismatch {
                expected: fitted.feature_dim,
                found: point.features.len(),
            });
        }

        let mut matrix = PredictionMatrix::new(data.len(), fitted.base_models.len());
        for (column, model) in fitted.base_models.iter().enumerate() {
            matrix.fill_column(column, 0, &model.predict_dataset(data));
        }
        let level_one = matrix.into_dataset(&data.labels());
        let pairs: Vec<PredictionPair> = level_one
            .points
            .iter()
            .map(|point| PredictionPair::new(fitted.meta_model.predict(&point.features), point.label))
            .collect();

        log(
            ctx.telemetry(),
            LogLevel::Info,
            "stacking_test_complete",
            json!({ "rows": pairs.len() }),
        );
        event(
            ctx.telemetry(),
            "ml.stacking.tested",
            json!({ "rows": pairs.len() }),
        );
        Ok(pairs)
    }
}
