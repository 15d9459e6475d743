use thiserror::Error;

/// Errors raised while shaping datasets and computing folds.
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    /// Operation needs at least one row.
    #[error("dataset is empty")]
    Empty,
    /// A row's feature vector differs in width from the first row.
    #[error("row {row} has {found} features, expected {expected}")]
    RaggedRow {
        /// Offending row index.
        row: usize,
        /// Width of the first row.
        expected: usize,
        /// Width of the offending row.
        found: usize,
    },
    /// Fold count must be at least two and below the row count.
    #[error("cannot split {rows} rows into {folds} folds")]
    InvalidFoldCount {
        /// Requested folds.
        folds: usize,
        /// Available rows.
        rows: usize,
    },
    /// An index passed to `select` is out of range.
    #[error("row index {index} out of range for {rows} rows")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Available rows.
        rows: usize,
    },
}

/// Errors raised by the model builder.
#[derive(Debug, Error)]
pub enum ModelBuilderError {
    /// Name does not match any registered algorithm.
    #[error("unknown algorithm `{0}`")]
    UnknownAlgorithm(String),
    /// A hyperparameter could not be parsed or is out of range.
    #[error("invalid hyperparameter `{key}`={value}: {reason}")]
    InvalidParameter {
        /// Parameter key.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Training data could not be used.
    #[error("invalid training data for {algorithm}: {source}")]
    Data {
        /// Algorithm being built.
        algorithm: String,
        /// Underlying dataset error.
        #[source]
        source: DatasetError,
    },
    /// Classifier requires labels from a fixed set.
    #[error("{algorithm} expects binary labels 0/1, found {label}")]
    NonBinaryLabel {
        /// Algorithm being built.
        algorithm: String,
        /// Offending label.
        label: f64,
    },
}

/// Errors raised by the stacking coordinator.
#[derive(Debug, Error)]
pub enum ModelHandlerError {
    /// No base algorithms were configured.
    #[error("stacking requires at least one base algorithm")]
    EmptyBaseModels,
    /// Parameter list length differs from the base algorithm list.
    #[error("{algorithms} base algorithms but {params} parameter sets")]
    ParameterMismatch {
        /// Number of base algorithms.
        algorithms: usize,
        /// Number of parameter maps.
        params: usize,
    },
    /// `test` was called before a successful `train`.
    #[error("stacking ensemble has not been trained")]
    NotTrained,
    /// Input rows do not match the width seen during training.
    #[error("expected {expected} features, got {found}")]
    FeatureWidthMismatch {
        /// Width seen at training time.
        expected: usize,
        /// Width of the offending input.
        found: usize,
    },
    /// Dataset shaping failed.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// The model builder failed.
    #[error("model builder failed: {0}")]
    Builder(#[from] ModelBuilderError),
}

/// Errors raised by frames and the frame store.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// Column name lookup failed.
    #[error("column `{0}` not found")]
    UnknownColumn(String),
    /// Column index out of range.
    #[error("column index {index} out of range for {columns} columns")]
    ColumnOutOfRange {
        /// Requested index.
        index: usize,
        /// Available columns.
        columns: usize,
    },
    /// Split ratio outside `(0, 1]`.
    #[error("split ratio {0} must be in (0, 1]")]
    InvalidRatio(f64),
    /// A cell could not be mapped to a categorical level.
    #[error("value {value} in column `{column}` is not a known level")]
    UnknownLevel {
        /// Column name.
        column: String,
        /// Offending value.
        value: f64,
    },
    /// No frame is stored under the key.
    #[error("frame `{0}` is not in the store")]
    MissingFrame(String),
    /// Another frame already occupies the key.
    #[error("frame key `{0}` is already in use")]
    KeyInUse(String),
}

/// Errors raised by the deep learning classifier.
#[derive(Debug, Error)]
pub enum DeepLearningError {
    /// Training input is unusable.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// Frame manipulation failed.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// A training argument is out of range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// Response column holds fewer than two levels.
    #[error("response column `{column}` has {levels} level(s), need at least 2")]
    DegenerateResponse {
        /// Response column name.
        column: String,
        /// Distinct levels found.
        levels: usize,
    },
    /// Scored input does not match the network's input width.
    #[error("model expects {expected} inputs, got {found}")]
    InputWidthMismatch {
        /// Inputs expected by the network.
        expected: usize,
        /// Inputs provided.
        found: usize,
    },
    /// Training produced non-finite weights.
    #[error("training diverged at sample {0}")]
    Diverged(u64),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
