use std::{fmt::Display, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::ModelBuilderError;

/// Iteration count for gradient learners.
pub const ITERATIONS: &str = "Iterations";
/// Gradient step size.
pub const LEARNING_RATE: &str = "Learning_Rate";
/// Regularisation strength.
pub const REG_PARAMETER: &str = "Reg_Parameter";
/// Naive Bayes variance smoothing.
pub const LAMBDA: &str = "Lambda";
/// Maximum tree depth.
pub const MAX_DEPTH: &str = "Max_Depth";
/// Minimum rows required to split a node.
pub const MIN_SAMPLES_SPLIT: &str = "Min_Samples_Split";
/// Split criterion, `variance` or `gini`.
pub const IMPURITY: &str = "Impurity";
/// Trees in a forest.
pub const NUM_TREES: &str = "Num_Trees";
/// Features considered per split in a forest.
pub const FEATURE_SUBSET_STRATEGY: &str = "Feature_Subset_Strategy";
/// Seed for stochastic learners.
pub const SEED: &str = "Seed";

/// String-keyed hyperparameters, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperParameters(IndexMap<String, String>);

impl HyperParameters {
    /// Empty parameter set; every learner falls back to its defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    /// Raw value lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no entries are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses `key`, falling back to `default` when absent.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ModelBuilderError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|err: T::Err| invalid(key, raw, err.to_string())),
        }
    }

    /// Parses a strictly positive integer.
    pub fn positive_usize(&self, key: &str, default: usize) -> Result<usize, ModelBuilderError> {
        let value = self.parse_or(key, default)?;
        if value == 0 {
            return Err(invalid(key, "0", "must be positive".into()));
        }
        Ok(value)
    }

    /// Parses a finite, non-negative float.
    pub fn non_negative_f64(&self, key: &str, default: f64) -> Result<f64, ModelBuilderError> {
        let value: f64 = self.parse_or(key, default)?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid(key, &value.to_string(), "must be finite and >= 0".into()));
        }
        Ok(value)
    }

    /// Parses a finite, strictly positive float.
    pub fn positive_f64(&self, key: &str, default: f64) -> Result<f64, ModelBuilderError> {
        let value = self.non_negative_f64(key, default)?;
        if value == 0.0 {
            return Err(invalid(key, "0", "must be > 0".into()));
        }
        Ok(value)
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for HyperParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

pub(crate) fn invalid(key: &str, value: &str, reason: String) -> ModelBuilderError {
    ModelBuilderError::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let params = HyperParameters::new();
        assert_eq!(params.positive_usize(ITERATIONS, 100).unwrap(), 100);
        assert!((params.positive_f64(LEARNING_RATE, 0.1).unwrap() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_and_rejects_values() {
        let params: HyperParameters = [(ITERATIONS, "25"), (LEARNING_RATE, "fast"), (MAX_DEPTH, "0")]
            .into_iter()
            .collect();
        assert_eq!(params.positive_usize(ITERATIONS, 1).unwrap(), 25);
        let err = params.positive_f64(LEARNING_RATE, 0.1).unwrap_err();
        assert!(err.to_string().contains("Learning_Rate"));
        assert!(params.positive_usize(MAX_DEPTH, 5).is_err());
    }

    #[test]
    fn serializes_as_plain_map() {
        let params = HyperParameters::new().with(NUM_TREES, 4);
        assert_eq!(serde_json::to_string(&params).unwrap(), r#"{"Num_Trees":"4"}"#);
    }
}
