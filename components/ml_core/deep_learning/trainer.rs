use std::time::Instant;

use chrono::Utc;
use ml_logging::LogLevel;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde_json::json;

use super::{
    frame::Frame,
    model::{argmax, DeepLearningModel, ScoreMetrics, ScoringRecord},
    network::{Network, UpdateRule},
    params::DeepLearningParameters,
};
use crate::{
    errors::{DatasetError, DeepLearningError, FrameError},
    telemetry::{self, MlTelemetry},
};

/// Rows of one frame split into inputs and level targets.
struct Rows {
    inputs: Vec<Vec<f64>>,
    targets: Vec<usize>,
}

impl Rows {
    fn from_frame(frame: &Frame, input_columns: &[usize], response: usize) -> Result<Self, FrameError> {
        let targets = frame
            .column(response)?
            .values()
            .iter()
            .map(|level| *level as usize)
            .collect();
        let inputs = (0..frame.num_rows())
            .map(|row| frame.row_of(row, input_columns))
            .collect();
        Ok(Self { inputs, targets })
    }

    fn len(&self) -> usize {
        self.targets.len()
    }

    fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn score(network: &Network, rows: &Rows, limit: usize) -> ScoreMetrics {
    let count = rows.len().min(limit);
    if count == 0 {
        return ScoreMetrics {
            rows: 0,
            classification_error: 0.0,
            logloss: 0.0,
        };
    }
    let mut errors = 0usize;
    let mut logloss = 0.0;
    for (inputs, target) in rows.inputs.iter().zip(&rows.targets).take(count) {
        let probabilities = network.probabilities(inputs);
        if argmax(&probabilities) != *target {
            errors += 1;
        }
        logloss -= probabilities
            .get(*target)
            .copied()
            .unwrap_or(0.0)
            .max(1e-15)
            .ln();
    }
    ScoreMetrics {
        rows: count,
        classification_error: errors as f64 / count as f64,
        logloss: logloss / count as f64,
    }
}

/// Runs iterations of per-sample updates, scoring on schedule, and returns the
/// final (or best) model.
pub(crate) fn train(
    params: DeepLearningParameters,
    train: &Frame,
    valid: &Frame,
    telemetry: Option<&MlTelemetry>,
) -> Result<DeepLearningModel, DeepLearningError> {
    let response = train
        .find(&params.response_column)
        .ok_or_else(|| FrameError::UnknownColumn(params.response_column.clone()))?;
    let levels = train
        .column(response)?
        .levels()
        .ok_or_else(|| DeepLearningError::InvalidArgument {
            name: "response_column",
            reason: format!("`{}` is not categorical", params.response_column),
        })?
        .to_vec();
    let input_indices: Vec<usize> = (0..train.num_cols()).filter(|idx| *idx != response).collect();
    let input_columns = input_indices
        .iter()
        .map(|idx| train.column(*idx).map(|column| column.name().to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    let training_rows = Rows::from_frame(train, &input_indices, response)?;
    let validation_rows = Rows::from_frame(valid, &input_indices, response)?;
    if training_rows.is_empty() {
        return Err(DatasetError::Empty.into());
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut network = Network::new(
        input_indices.len(),
        &params.hidden,
        levels.len(),
        params.activation,
        &mut rng,
    );
    let rule = UpdateRule::from_parameters(&params);

    let rows = training_rows.len();
    let total = params.epochs as u64 * rows as u64;
    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut rng);
    let mut cursor = 0usize;

    let started = Instant::now();
    let mut last_scored = started;
    let mut processed = 0u64;
    let mut iteration = 0usize;
    let mut history: Vec<ScoringRecord> = Vec::new();
    let mut best: Option<(usize, ScoreMetrics, Network)> = None;

    while processed < total {
        let batch = (params.train_samples_per_iteration as u64).min(total - processed);
        for _ in 0..batch {
            if cursor == rows {
                order.shuffle(&mut rng);
                cursor = 0;
            }
            let row = order[cursor];
            cursor += 1;
            network.train_sample(
                &training_rows.inputs[row],
                training_rows.targets[row],
                &rule,
                &mut rng,
            );
        }
        processed += batch;
        iteration += 1;
        if !network.is_finite() {
            return Err(DeepLearningError::Diverged(processed));
        }

        let finished = processed >= total;
        if iteration > 1 && !finished && last_scored.elapsed() < params.score_interval {
            continue;
        }
        last_scored = Instant::now();
        let record = ScoringRecord {
            iteration,
            samples: processed,
            epochs: processed as f64 / rows as f64,
            elapsed_secs: started.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
            training: score(&network, &training_rows, params.score_training_samples),
            validation: (!validation_rows.is_empty())
                .then(|| score(&network, &validation_rows, usize::MAX)),
            weight_magnitudes: params.diagnostics.then(|| network.weight_magnitudes()),
        };
        let metrics = *record.selection_metrics();
        telemetry::log(
            telemetry,
            LogLevel::Debug,
            "deep_learning_scored",
            json!({
                "model_id": params.model_id,
                "iteration": iteration,
                "samples": processed,
                "classification_error": metrics.classification_error,
                "logloss": metrics.logloss,
            }),
        );
        telemetry::event(
            telemetry,
            "ml.deep.scored",
            json!({
                "model_id": params.model_id,
                "iteration": iteration,
                "classification_error": metrics.classification_error,
            }),
        );
        history.push(record);

        if best
            .as_ref()
            .map_or(true, |(_, best_metrics, _)| metrics.better_than(best_metrics))
        {
            best = Some((iteration, metrics, network.clone()));
        }
        if params.classification_stop >= 0.0
            && metrics.classification_error <= params.classification_stop
        {
            break;
        }
    }

    let (best_iteration, network) = match best {
        Some((best_iteration, _, snapshot)) if params.overwrite_with_best_model => {
            (best_iteration, snapshot)
        }
        _ => (iteration, network),
    };
    Ok(DeepLearningModel {
        network,
        parameters: params,
        input_columns,
        levels,
        history,
        best_iteration,
        samples_trained: processed,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::DeepLearningSettings,
        dataset::Dataset,
        deep_learning::{params::TrainingRequest, store::FrameKey},
    };

    fn frames(rows: usize) -> (Frame, Frame) {
        let data = Dataset::synthetic_classification(rows, 3, 2, 5);
        let mut frame = Frame::from_dataset(&data).unwrap();
        frame.to_categorical(3).unwrap();
        frame.split(0.75).unwrap()
    }

    fn params(batch: usize, epochs: usize) -> DeepLearningParameters {
        let request = TrainingRequest::new(3, vec![8])
            .with_batch_size(batch)
            .with_epochs(epochs);
        DeepLearningParameters::new(
            3,
            FrameKey::new("t"),
            FrameKey::new("v"),
            "C4",
            &request,
            &DeepLearningSettings::default(),
        )
    }

    #[test]
    fn scores_first_and_last_iteration() {
        let (train_frame, valid_frame) = frames(80);
        let model = train(params(20, 2), &train_frame, &valid_frame, None).unwrap();
        // 60 train rows * 2 epochs = 120 samples in 6 iterations of 20
        assert_eq!(model.samples_trained(), 120);
        let history = model.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].iteration, 1);
        assert_eq!(history[1].iteration, 6);
        assert_eq!(history[0].training.rows, 20);
        assert_eq!(history[1].validation.unwrap().rows, 20);
        assert!((history[1].epochs - 2.0).abs() < 1e-12);
        assert_eq!(model.input_columns(), &["C1", "C2", "C3"]);
        assert_eq!(model.levels(), &[0.0, 1.0]);
    }

    #[test]
    fn zero_interval_scores_every_iteration() {
        let (train_frame, valid_frame) = frames(40);
        let mut p = params(10, 1);
        p.score_interval = Duration::ZERO;
        p.diagnostics = true;
        let model = train(p, &train_frame, &valid_frame, None).unwrap();
        assert_eq!(model.history().len(), 3);
        assert_eq!(model.history()[0].weight_magnitudes.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn classification_stop_ends_early() {
        let (train_frame, valid_frame) = frames(40);
        let mut p = params(10, 5);
        p.classification_stop = 1.0;
        let model = train(p, &train_frame, &valid_frame, None).unwrap();
        assert_eq!(model.history().len(), 1);
        assert_eq!(model.samples_trained(), 10);
    }

    #[test]
    fn best_snapshot_is_kept() {
        let (train_frame, valid_frame) = frames(60);
        let mut p = params(5, 3);
        p.score_interval = Duration::ZERO;
        let model = train(p, &train_frame, &valid_frame, None).unwrap();
        let best = model
            .history()
            .iter()
            .find(|record| record.iteration == model.best_iteration())
            .unwrap();
        for record in model.history() {
            assert!(!record.selection_metrics().better_than(best.selection_metrics()));
        }
    }

    #[test]
    fn same_seed_same_model() {
        let (train_frame, valid_frame) = frames(40);
        let a = train(params(10, 1), &train_frame, &valid_frame, None).unwrap();
        let b = train(params(10, 1), &train_frame, &valid_frame, None).unwrap();
        assert_eq!(a.network(), b.network());
    }

    #[test]
    fn numeric_response_is_rejected() {
        let data = Dataset::synthetic_classification(20, 2, 2, 1);
        let frame = Frame::from_dataset(&data).unwrap();
        let mut p = params(5, 1);
        p.response_column = "C3".into();
        let err = train(p, &frame, &Frame::default(), None).unwrap_err();
        assert!(matches!(
            err,
            DeepLearningError::InvalidArgument {
                name: "response_column",
                ..
            }
        ));
    }
}
