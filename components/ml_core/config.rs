use std::{fs, path::Path, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{deep_learning::store::FrameStore, errors::ConfigError, telemetry::MlTelemetry};

/// Settings for summary statistics computed over datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryStatisticsSettings {
    /// Histogram bins per numeric feature.
    pub histogram_bins: usize,
    /// Distinct-value count at or below which a feature is treated as categorical.
    pub categorical_threshold: usize,
    /// Rows sampled when computing statistics.
    pub sample_size: usize,
}

impl Default for SummaryStatisticsSettings {
    fn default() -> Self {
        Self {
            histogram_bins: 20,
            categorical_threshold: 20,
            sample_size: 10_000,
        }
    }
}

/// Stacking defaults used when callers do not pass their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingSettings {
    /// Cross-validation folds.
    pub num_folds: usize,
    /// Fold assignment seed.
    pub seed: u64,
}

impl Default for StackingSettings {
    fn default() -> Self {
        Self {
            num_folds: 5,
            seed: 42,
        }
    }
}

/// Fixed hyperparameters of the deep learning classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepLearningSettings {
    /// Dropout applied to the input layer.
    pub input_dropout_ratio: f64,
    /// Dropout applied to each hidden layer.
    pub hidden_dropout_ratio: f64,
    /// L1 weight penalty.
    pub l1: f64,
    /// Upper bound on each neuron's incoming squared weight sum.
    pub max_w2: f64,
    /// ADADELTA decay.
    pub rho: f64,
    /// ADADELTA smoothing term.
    pub epsilon: f64,
    /// Minimum seconds between validation scoring rounds.
    pub score_interval_secs: f64,
    /// Rows per chunk for chunk-local shuffling.
    pub chunk_rows: usize,
    /// Seed for shuffling, initialisation and dropout.
    pub seed: u64,
}

impl Default for DeepLearningSettings {
    fn default() -> Self {
        Self {
            input_dropout_ratio: 0.1,
            hidden_dropout_ratio: 0.5,
            l1: 1e-5,
            max_w2: 10.0,
            rho: 0.99,
            epsilon: 1e-8,
            score_interval_secs: 60.0,
            chunk_rows: 1_000,
            seed: 999_999_999,
        }
    }
}

/// Core configuration, loaded once and shared through [`MlContext`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlCoreConfig {
    /// Free-form ML properties, read through [`MlCoreConfig::property`].
    /// The library itself reads no keys; they are carried for embedding
    /// applications.
    pub properties: IndexMap<String, String>,
    /// Summary statistics settings.
    pub summary_statistics: SummaryStatisticsSettings,
    /// Stacking defaults.
    pub stacking: StackingSettings,
    /// Deep learning defaults.
    pub deep_learning: DeepLearningSettings,
}

impl MlCoreConfig {
    /// Reads and validates a JSON config file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Looks up a free-form property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Rejects values the trainers cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dl = &self.deep_learning;
        check_ratio("deep_learning.input_dropout_ratio", dl.input_dropout_ratio)?;
        check_ratio("deep_learning.hidden_dropout_ratio", dl.hidden_dropout_ratio)?;
        if !dl.l1.is_finite() || dl.l1 < 0.0 {
            return invalid("deep_learning.l1", format!("{} must be >= 0", dl.l1));
        }
        if !dl.max_w2.is_finite() || dl.max_w2 <= 0.0 {
            return invalid("deep_learning.max_w2", format!("{} must be > 0", dl.max_w2));
        }
        if dl.rho.is_nan() || dl.rho <= 0.0 || dl.rho >= 1.0 {
            return invalid("deep_learning.rho", format!("{} must be in (0, 1)", dl.rho));
        }
        if dl.epsilon.is_nan() || dl.epsilon <= 0.0 {
            return invalid("deep_learning.epsilon", format!("{} must be > 0", dl.epsilon));
        }
        if dl.score_interval_secs.is_nan() || dl.score_interval_secs < 0.0 {
            return invalid(
                "deep_learning.score_interval_secs",
                format!("{} must be >= 0", dl.score_interval_secs),
            );
        }
        if dl.chunk_rows == 0 {
            return invalid("deep_learning.chunk_rows", "must be positive".into());
        }
        if self.stacking.num_folds < 2 {
            return invalid(
                "stacking.num_folds",
                format!("{} must be at least 2", self.stacking.num_folds),
            );
        }
        if self.summary_statistics.histogram_bins == 0 {
            return invalid("summary_statistics.histogram_bins", "must be positive".into());
        }
        if self.summary_statistics.sample_size == 0 {
            return invalid("summary_statistics.sample_size", "must be positive".into());
        }
        Ok(())
    }
}

fn check_ratio(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        invalid(field, format!("{value} must be in [0, 1)"))
    }
}

fn invalid(field: &'static str, reason: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid { field, reason })
}

/// Everything a training call needs besides its data: configuration,
/// the frame store, and optional telemetry.
#[derive(Debug, Clone)]
pub struct MlContext {
    config: Arc<MlCoreConfig>,
    store: Arc<FrameStore>,
    telemetry: Option<MlTelemetry>,
}

impl MlContext {
    /// Builds a context with a fresh frame store and no telemetry.
    #[must_use]
    pub fn new(config: MlCoreConfig) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(FrameStore::default()),
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: MlTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Shares an existing frame store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<FrameStore>) -> Self {
        self.store = store;
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &MlCoreConfig {
        &self.config
    }

    /// Frame store backing deep learning runs.
    #[must_use]
    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    /// Telemetry handle, if any.
    #[must_use]
    pub fn telemetry(&self) -> Option<&MlTelemetry> {
        self.telemetry.as_ref()
    }
}

impl Default for MlContext {
    fn default() -> Self {
        Self::new(MlCoreConfig::default())
    }
}
