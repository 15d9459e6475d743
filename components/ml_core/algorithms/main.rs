//! Algorithm registry: learners looked up by name and the models they produce.

/// Gaussian naive Bayes.
pub mod bayes;
/// Linear, ridge, lasso, logistic and SVM learners.
pub mod linear;
/// String-keyed hyperparameters.
pub mod params;
/// Decision trees and random forests.
pub mod tree;

use std::{fmt, str::FromStr, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{dataset::Dataset, errors::ModelBuilderError};
pub use params::HyperParameters;

/// Built-in algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    /// Ordinary least squares.
    LinearRegression,
    /// Least squares with an L2 penalty.
    RidgeRegression,
    /// Least squares with an L1 penalty.
    LassoRegression,
    /// Binary logistic regression.
    LogisticRegression,
    /// Linear support vector machine (hinge loss).
    Svm,
    /// Gaussian naive Bayes.
    NaiveBayes,
    /// CART decision tree.
    DecisionTree,
    /// Bagged decision trees.
    RandomForest,
}

impl Algorithm {
    /// Every built-in algorithm, in registry order.
    pub const ALL: [Self; 8] = [
        Self::LinearRegression,
        Self::RidgeRegression,
        Self::LassoRegression,
        Self::LogisticRegression,
        Self::Svm,
        Self::NaiveBayes,
        Self::DecisionTree,
        Self::RandomForest,
    ];

    /// Canonical registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LinearRegression => "LINEAR_REGRESSION",
            Self::RidgeRegression => "RIDGE_REGRESSION",
            Self::LassoRegression => "LASSO_REGRESSION",
            Self::LogisticRegression => "LOGISTIC_REGRESSION",
            Self::Svm => "SVM",
            Self::NaiveBayes => "NAIVE_BAYES",
            Self::DecisionTree => "DECISION_TREE",
            Self::RandomForest => "RANDOM_FOREST",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = ModelBuilderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(raw);
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.name() == normalized)
            .ok_or_else(|| ModelBuilderError::UnknownAlgorithm(raw.to_string()))
    }
}

/// `linear-regression`, `Linear Regression` and `LINEAR_REGRESSION` all map to the same key.
fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| match ch {
            '-' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// A fitted model that scores single rows.
pub trait Predictor: fmt::Debug + Send + Sync {
    /// Scores one feature vector.
    fn predict(&self, features: &[f64]) -> f64;
}

impl Predictor for linear::LinearModel {
    fn predict(&self, features: &[f64]) -> f64 {
        Self::predict(self, features)
    }
}

impl Predictor for bayes::NaiveBayesModel {
    fn predict(&self, features: &[f64]) -> f64 {
        Self::predict(self, features)
    }
}

impl Predictor for tree::DecisionTreeModel {
    fn predict(&self, features: &[f64]) -> f64 {
        Self::predict(self, features)
    }
}

impl Predictor for tree::RandomForestModel {
    fn predict(&self, features: &[f64]) -> f64 {
        Self::predict(self, features)
    }
}

/// Something that fits a [`Predictor`] from labelled data.
pub trait Learner: Send + Sync {
    /// Fits on `data` using `params`.
    fn fit(
        &self,
        data: &Dataset,
        params: &HyperParameters,
    ) -> Result<Arc<dyn Predictor>, ModelBuilderError>;
}

/// Adapter dispatching to the built-in implementations.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinLearner(pub Algorithm);

impl Learner for BuiltinLearner {
    fn fit(
        &self,
        data: &Dataset,
        params: &HyperParameters,
    ) -> Result<Arc<dyn Predictor>, ModelBuilderError> {
        Ok(match self.0 {
            Algorithm::NaiveBayes => Arc::new(bayes::fit(data, params)?),
            Algorithm::DecisionTree => Arc::new(tree::fit_tree(data, params)?),
            Algorithm::RandomForest => Arc::new(tree::fit_forest(data, params)?),
            linear_family => Arc::new(linear::fit(linear_family, data, params)?),
        })
    }
}

/// Handle to a fitted model.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    id: Uuid,
    algorithm: String,
    feature_dim: usize,
    predictor: Arc<dyn Predictor>,
}

impl TrainedModel {
    /// Wraps a predictor produced for `algorithm`.
    #[must_use]
    pub fn new(algorithm: impl Into<String>, feature_dim: usize, predictor: Arc<dyn Predictor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            algorithm: algorithm.into(),
            feature_dim,
            predictor,
        }
    }

    /// Unique model id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Registry name of the algorithm.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Feature width seen at training time.
    #[must_use]
    pub const fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Scores one row.
    #[must_use]
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.predictor.predict(features)
    }

    /// Scores every row of `data`, in order.
    #[must_use]
    pub fn predict_dataset(&self, data: &Dataset) -> Vec<f64> {
        data.points
            .iter()
            .map(|point| self.predict(&point.features))
            .collect()
    }
}

/// Builds models by algorithm name.
pub trait ModelBuilder: Send + Sync {
    /// Fits `algorithm` on `data`.
    fn build(
        &self,
        algorithm: &str,
        data: &Dataset,
        params: &HyperParameters,
    ) -> Result<TrainedModel, ModelBuilderError>;
}

/// Name-keyed learner table, pre-populated with the built-ins.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    learners: IndexMap<String, Arc<dyn Learner>>,
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("learners", &self.learners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for algorithm in Algorithm::ALL {
            registry.register(algorithm.name(), BuiltinLearner(algorithm));
        }
        registry
    }
}

impl AlgorithmRegistry {
    /// Registry without any learners.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            learners: IndexMap::new(),
        }
    }

    /// Adds or replaces the learner for `name`.
    pub fn register(&mut self, name: &str, learner: impl Learner + 'static) {
        self.learners.insert(normalize(name), Arc::new(learner));
    }

    /// Whether `name` resolves to a learner.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.learners.contains_key(&normalize(name))
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.learners.keys().map(String::as_str).collect()
    }
}

impl ModelBuilder for AlgorithmRegistry {
    fn build(
        &self,
        algorithm: &str,
        data: &Dataset,
        params: &HyperParameters,
    ) -> Result<TrainedModel, ModelBuilderError> {
        let key = normalize(algorithm);
        let learner = self
            .learners
            .get(&key)
            .ok_or_else(|| ModelBuilderError::UnknownAlgorithm(algorithm.to_string()))?;
        let feature_dim = data.validate().map_err(|source| ModelBuilderError::Data {
            algorithm: key.clone(),
            source,
        })?;
        let predictor = learner.fit(data, params)?;
        Ok(TrainedModel::new(key, feature_dim, predictor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LabeledPoint;

    #[derive(Debug)]
    struct Constant(f64);

    impl Predictor for Constant {
        fn predict(&self, _features: &[f64]) -> f64 {
            self.0
        }
    }

    struct ConstantLearner;

    impl Learner for ConstantLearner {
        fn fit(
            &self,
            data: &Dataset,
            _params: &HyperParameters,
        ) -> Result<Arc<dyn Predictor>, ModelBuilderError> {
            Ok(Arc::new(Constant(data.len() as f64)))
        }
    }

    fn data() -> Dataset {
        Dataset::new(vec![
            LabeledPoint::new(vec![0.0], 0.0),
            LabeledPoint::new(vec![1.0], 1.0),
            LabeledPoint::new(vec![2.0], 1.0),
        ])
    }

    #[test]
    fn names_are_normalized() {
        assert_eq!("linear-regression".parse::<Algorithm>().unwrap(), Algorithm::LinearRegression);
        assert_eq!(" Random Forest ".parse::<Algorithm>().unwrap(), Algorithm::RandomForest);
        assert!(matches!(
            "GBT".parse::<Algorithm>(),
            Err(ModelBuilderError::UnknownAlgorithm(name)) if name == "GBT"
        ));
    }

    #[test]
    fn registry_builds_every_builtin() {
        let registry = AlgorithmRegistry::default();
        assert_eq!(registry.names().len(), Algorithm::ALL.len());
        for algorithm in Algorithm::ALL {
            let model = registry
                .build(algorithm.name(), &data(), &HyperParameters::new())
                .unwrap();
            assert_eq!(model.algorithm(), algorithm.name());
            assert_eq!(model.feature_dim(), 1);
            assert_eq!(model.predict_dataset(&data()).len(), 3);
        }
    }

    #[test]
    fn unknown_name_is_reported() {
        let registry = AlgorithmRegistry::default();
        let err = registry
            .build("K_MEANS", &data(), &HyperParameters::new())
            .unwrap_err();
        assert!(matches!(err, ModelBuilderError::UnknownAlgorithm(_)));
    }

    #[test]
    fn custom_learners_can_be_registered() {
        let mut registry = AlgorithmRegistry::empty();
        registry.register("row-count", ConstantLearner);
        assert!(registry.contains("ROW_COUNT"));
        let model = registry
            .build("row_count", &data(), &HyperParameters::new())
            .unwrap();
        assert_eq!(model.predict(&[42.0]), 3.0);
    }
}
