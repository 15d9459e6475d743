use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ml_core::{
    AlgorithmRegistry, Dataset, DatasetSummary, DeepLearningClassifier, EnsembleSpec,
    EvaluationReport, HyperParameters, LabeledPoint, MlContext, MlCoreConfig, MlTelemetry, Stacking,
    TrainingRequest,
};
use ml_events::FileEventPublisher;
use ml_logging::LogLevel;
use serde::Deserialize;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "mlctl", version, about = "Stacked ensembles and deep classifiers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains a stacked ensemble and scores the held-out rows.
    Stack(StackArgs),
    /// Trains the deep learning classifier and scores the held-out rows.
    Deep(DeepArgs),
    /// Prints per-column summary statistics of a dataset.
    Describe(DescribeArgs),
    /// Prints the effective configuration.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct StackArgs {
    /// Base algorithm; repeat for more.
    #[arg(long = "base", required = true)]
    bases: Vec<String>,
    /// Meta algorithm.
    #[arg(long)]
    meta: String,
    #[arg(long)]
    folds: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// `INDEX:KEY=VALUE` hyperparameter for base learner INDEX.
    #[arg(long = "base-param")]
    base_params: Vec<String>,
    /// `KEY=VALUE` hyperparameter for the meta learner.
    #[arg(long = "meta-param")]
    meta_params: Vec<String>,
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct DeepArgs {
    /// Hidden layer sizes, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    layers: Vec<usize>,
    #[arg(long, default_value_t = 10)]
    epochs: usize,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value_t = 0.8)]
    train_fraction: f64,
    /// Response column (`C1`, `C2`, ...); defaults to the last column.
    #[arg(long, default_value = "")]
    response: String,
    #[arg(long, default_value_t = 1)]
    model_id: u64,
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct DescribeArgs {
    #[command(flatten)]
    data: DataArgs,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// JSON dataset: `{"points": [...]}` or a bare array of points.
    #[arg(long, conflicts_with = "synthetic")]
    dataset: Option<PathBuf>,
    /// Generate this many synthetic rows instead of reading a file.
    #[arg(long)]
    synthetic: Option<usize>,
    #[arg(long, default_value_t = 4)]
    features: usize,
    #[arg(long, default_value_t = 2)]
    classes: usize,
    #[arg(long, default_value_t = 7)]
    data_seed: u64,
    /// Trailing share of rows held out for scoring.
    #[arg(long, default_value_t = 0.25)]
    test_fraction: f64,
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON-lines log file.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// JSON-lines event file.
    #[arg(long)]
    event_log: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Level::Info)]
    log_level: Level,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => Self::Debug,
            Level::Info => Self::Info,
            Level::Warn => Self::Warn,
            Level::Error => Self::Error,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DatasetFile {
    Wrapped(Dataset),
    Points(Vec<LabeledPoint>),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Stack(args) => handle_stack(args),
        Commands::Deep(args) => handle_deep(args),
        Commands::Describe(args) => handle_describe(&args),
        Commands::Config { config } => {
            let config = load_config(config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn handle_stack(args: StackArgs) -> Result<()> {
    let ctx = build_context(&args.common, "stacking")?;
    let (train, test) = load_data(&args.data)?;

    let mut spec = EnsembleSpec::new(&ctx, args.bases.iter().cloned(), args.meta.clone());
    if let Some(folds) = args.folds {
        spec = spec.with_folds(folds);
    }
    if let Some(seed) = args.seed {
        spec = spec.with_seed(seed);
    }
    for raw in &args.base_params {
        let (index, pair) = raw
            .split_once(':')
            .with_context(|| format!("base param `{raw}` must look like INDEX:KEY=VALUE"))?;
        let index: usize = index.parse().with_context(|| format!("bad index in `{raw}`"))?;
        let (key, value) = parse_pair(pair)?;
        let Some(params) = spec.base_params.get_mut(index) else {
            bail!("base param `{raw}` refers to missing base learner {index}");
        };
        params.insert(key, value);
    }
    let mut meta_params = HyperParameters::new();
    for raw in &args.meta_params {
        let (key, value) = parse_pair(raw)?;
        meta_params.insert(key, value);
    }
    spec = spec.with_meta_params(meta_params);

    let registry = AlgorithmRegistry::default();
    let mut stacking = Stacking::new();
    stacking
        .train(&ctx, &registry, &train, &spec)
        .context("training stacked ensemble")?;
    let pairs = stacking.test(&ctx, &test).context("scoring stacked ensemble")?;
    let report = EvaluationReport::from_pairs(&pairs);
    let output = json!({
        "command": "stack",
        "base_algorithms": spec.base_algorithms,
        "meta_algorithm": spec.meta_algorithm,
        "num_folds": spec.num_folds,
        "seed": spec.seed,
        "level_one_shape": stacking.level_one_shape(),
        "train_rows": train.len(),
        "report": report,
        "summary": report.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_deep(args: DeepArgs) -> Result<()> {
    let ctx = build_context(&args.common, "deep_learning")?;
    let (train, test) = load_data(&args.data)?;
    let request = TrainingRequest::new(args.model_id, args.layers)
        .with_batch_size(args.batch_size)
        .with_epochs(args.epochs)
        .with_train_fraction(args.train_fraction)
        .with_response_column(args.response);

    let classifier = DeepLearningClassifier::new();
    let model = classifier
        .train(&ctx, &train, &request)
        .context("training deep learning classifier")?;
    let pairs = classifier
        .test(&ctx, &model, &test)
        .context("scoring deep learning classifier")?;
    let report = EvaluationReport::from_pairs(&pairs);
    let output = json!({
        "command": "deep",
        "model_id": model.id(),
        "response_column": model.response_column(),
        "levels": model.levels(),
        "best_iteration": model.best_iteration(),
        "samples_trained": model.samples_trained(),
        "scoring_history": model.history(),
        "report": report,
        "summary": report.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_describe(args: &DescribeArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let data = load_dataset(&args.data)?;
    let summary = DatasetSummary::compute(&data, &config.summary_statistics)
        .context("summarising dataset")?;
    let output = json!({
        "command": "describe",
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<MlCoreConfig> {
    match path {
        Some(path) => MlCoreConfig::load(path).with_context(|| format!("loading config {path:?}")),
        None => Ok(MlCoreConfig::default()),
    }
}

fn build_context(common: &CommonArgs, module: &str) -> Result<MlContext> {
    let config = load_config(common.config.as_ref())?;
    let ctx = MlContext::new(config);
    if common.log_file.is_none() && common.event_log.is_none() {
        return Ok(ctx);
    }
    let mut builder = MlTelemetry::builder(module).min_level(common.log_level.into());
    if let Some(path) = &common.log_file {
        builder = builder.log_path(path);
    }
    if let Some(path) = &common.event_log {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    Ok(ctx.with_telemetry(builder.build()?))
}

fn load_dataset(args: &DataArgs) -> Result<Dataset> {
    let data = match (&args.dataset, args.synthetic) {
        (Some(path), _) => read_dataset(path)?,
        (None, Some(rows)) => {
            Dataset::synthetic_classification(rows, args.features, args.classes, args.data_seed)
        }
        (None, None) => bail!("pass --dataset <file.json> or --synthetic <rows>"),
    };
    data.validate().context("invalid dataset")?;
    Ok(data)
}

fn load_data(args: &DataArgs) -> Result<(Dataset, Dataset)> {
    let data = load_dataset(args)?;
    anyhow::ensure!(
        (0.0..1.0).contains(&args.test_fraction),
        "--test-fraction must be in [0, 1)"
    );
    Ok(data.train_test_split(args.test_fraction))
}

fn read_dataset(path: &Path) -> Result<Dataset> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading dataset {path:?}"))?;
    let parsed: DatasetFile =
        serde_json::from_str(&contents).with_context(|| format!("parsing dataset {path:?}"))?;
    Ok(match parsed {
        DatasetFile::Wrapped(data) => data,
        DatasetFile::Points(points) => Dataset::new(points),
    })
}

fn parse_pair(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("`{raw}` must look like KEY=VALUE"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_stack_command() {
        let cli = Cli::try_parse_from([
            "mlctl",
            "stack",
            "--base",
            "LINEAR_REGRESSION",
            "--base",
            "DECISION_TREE",
            "--meta",
            "LINEAR_REGRESSION",
            "--synthetic",
            "50",
            "--base-param",
            "1:Max_Depth=3",
        ])
        .unwrap();
        let Commands::Stack(args) = cli.command else {
            panic!("expected stack");
        };
        assert_eq!(args.bases.len(), 2);
        assert_eq!(args.data.synthetic, Some(50));
        assert_eq!(args.base_params, vec!["1:Max_Depth=3"]);
    }

    #[test]
    fn parses_layer_list() {
        let cli =
            Cli::try_parse_from(["mlctl", "deep", "--layers", "32,16", "--synthetic", "20"]).unwrap();
        let Commands::Deep(args) = cli.command else {
            panic!("expected deep");
        };
        assert_eq!(args.layers, vec![32, 16]);
        assert_eq!(args.response, "");
    }

    #[test]
    fn reads_both_dataset_layouts() {
        let dir = tempdir().unwrap();
        let wrapped = dir.path().join("wrapped.json");
        fs::write(
            &wrapped,
            r#"{"points":[{"features":[1.0,2.0],"label":1.0}]}"#,
        )
        .unwrap();
        let bare = dir.path().join("bare.json");
        fs::write(&bare, r#"[{"features":[1.0],"label":0.0},{"features":[2.0],"label":1.0}]"#)
            .unwrap();
        assert_eq!(read_dataset(&wrapped).unwrap().feature_dim(), 2);
        assert_eq!(read_dataset(&bare).unwrap().len(), 2);
    }

    #[test]
    fn splits_synthetic_data() {
        let args = DataArgs {
            dataset: None,
            synthetic: Some(40),
            features: 3,
            classes: 2,
            data_seed: 1,
            test_fraction: 0.25,
        };
        let (train, test) = load_data(&args).unwrap();
        assert_eq!((train.len(), test.len()), (30, 10));
    }

    #[test]
    fn describe_reads_sample_size_from_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ml.json");
        fs::write(&path, r#"{ "summary_statistics": { "sample_size": 10 } }"#).unwrap();
        let cli = Cli::try_parse_from([
            "mlctl",
            "describe",
            "--synthetic",
            "40",
            "--features",
            "2",
            "--config",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let Commands::Describe(args) = cli.command else {
            panic!("expected describe");
        };
        let config = load_config(args.config.as_ref()).unwrap();
        let data = load_dataset(&args.data).unwrap();
        let summary = DatasetSummary::compute(&data, &config.summary_statistics).unwrap();
        assert_eq!(summary.rows, 40);
        assert_eq!(summary.sampled_rows, 10);
        assert_eq!(summary.features.len(), 2);
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(parse_pair("Iterations").is_err());
        assert_eq!(
            parse_pair(" Iterations = 50 ").unwrap(),
            ("Iterations".to_string(), "50".to_string())
        );
    }
}
