//! End-to-end training run: data, split, model, loop, final evaluation.

use std::path::PathBuf;
use std::sync::Arc;

use burn::optim::decay::WeightDecayConfig;
use burn::optim::AdamConfig;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use steer_core::{DataSplit, Direction, Error, Result, RunConfig};
use steer_dataset::{
    resolve_split, AugmentationPipeline, DatasetAdapter, DatasetSplit, Normalizer, Preprocessor,
    SampleStore,
};
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::evaluator::{EvaluationReport, Evaluator};
use crate::model::{ModelBuilder, SteeringNet};
use crate::state::TrainerPhase;
use crate::trainer::{ModelRunner, RunnerData, Trainer};

pub const SPLIT_FILE: &str = "split.json";
pub const HISTORY_FILE: &str = "history.json";

/// What a finished run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub final_phase: TrainerPhase,
    pub stopped_at_epoch: usize,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    /// Best checkpoint re-evaluated on the validation partition
    pub final_eval: EvaluationReport,
    pub output_dir: PathBuf,
}

/// Load the dataset described by `config` and train on it.
pub fn run<B: AutodiffBackend>(config: &RunConfig, device: &B::Device) -> Result<RunSummary> {
    config.validate()?;

    let preprocessor = Preprocessor::new(config.data.preprocess.clone())?;
    let store = SampleStore::from_directory(
        &config.data.data_dir,
        &preprocessor,
        config.data.strictness,
        config.data.num_workers,
    )?;

    let split = resolve_split(
        &config.output_dir.join(SPLIT_FILE),
        store.len(),
        config.data.validation_fraction,
        config.data.split_seed.unwrap_or(config.seed),
        config.data.reshuffle,
    )?;

    train_and_evaluate::<B>(config, &store, &split, device)
}

/// Train on an already loaded store and split, then evaluate the best checkpoint.
pub fn train_and_evaluate<B: AutodiffBackend>(
    config: &RunConfig,
    store: &SampleStore,
    split: &DatasetSplit,
    device: &B::Device,
) -> Result<RunSummary> {
    let hp = &config.hyperparameters;
    B::seed(config.seed);

    let train_samples = store.partition(split, DataSplit::Train)?;
    let val_samples = store.partition(split, DataSplit::Validation)?;
    log_partition(DataSplit::Train, &train_samples);
    log_partition(DataSplit::Validation, &val_samples);

    let pipeline = Arc::new(AugmentationPipeline::from_config(&config.augmentation));
    let data = RunnerData {
        train: DatasetAdapter::augmented(train_samples, pipeline, config.seed),
        validation: DatasetAdapter::plain(val_samples, Normalizer::from(&config.augmentation)),
        batch_size: hp.batch_size,
        shuffle_seed: config.seed,
    };

    let builder = ModelBuilder::from_config(&config.model);
    let description = builder.describe(config.model.num_classes, hp.dropout);
    let model = builder.build::<B>(config.model.num_classes, hp.dropout, device)?;

    let optimizer = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(hp.weight_decay as f32)))
        .init::<B, SteeringNet<B>>();

    let checkpoints = CheckpointStore::new(&config.output_dir);
    let mut runner = ModelRunner::new(
        model,
        optimizer,
        description,
        data,
        checkpoints.clone(),
        device.clone(),
    );

    info!(
        max_epochs = hp.max_epochs,
        batch_size = hp.batch_size,
        learning_rate = hp.learning_rate,
        "Starting training"
    );
    let outcome = Trainer::new(hp).fit(&mut runner)?;
    outcome
        .history
        .save_json(&config.output_dir.join(HISTORY_FILE))?;

    let best = outcome
        .state
        .best_checkpoint
        .ok_or_else(|| Error::Model("training finished without a checkpoint".to_string()))?;

    let checkpoint = checkpoints.load()?;
    let evaluator = Evaluator::<B::InnerBackend>::new(device.clone(), hp.batch_size);
    let final_eval = evaluator.evaluate(&checkpoint, runner.validation())?;

    if (final_eval.loss - best.val_loss).abs() > 1e-4 * best.val_loss.abs().max(1.0) {
        warn!(
            recorded = best.val_loss,
            reevaluated = final_eval.loss,
            "Reloaded checkpoint does not reproduce its validation loss"
        );
    }

    info!(
        "Stopped after epoch {}: {} ({}). Best epoch {} with val loss {:.4}, val acc {:.2}%",
        outcome.state.epoch,
        outcome.final_phase,
        outcome.final_phase.reason(),
        best.epoch,
        best.val_loss,
        100.0 * final_eval.accuracy
    );

    Ok(RunSummary {
        final_phase: outcome.final_phase,
        stopped_at_epoch: outcome.state.epoch,
        best_epoch: best.epoch,
        best_val_loss: best.val_loss,
        final_eval,
        output_dir: config.output_dir.clone(),
    })
}

fn log_partition(split: DataSplit, samples: &[steer_core::Sample]) {
    let mut counts = [0usize; Direction::COUNT];
    for sample in samples {
        counts[sample.label().label()] += 1;
    }
    let [go, left, right] = counts;
    info!(go, left, right, "{split} partition: {} samples", samples.len());
}
