//! Epoch loop with plateau scheduling, checkpointing and early stopping.
//!
//! [`Trainer`] only drives the state machine; the numerical work sits
//! behind [`EpochRunner`]. [`ModelRunner`] is the burn implementation.

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use steer_core::{
    EpochRecord, Error, Hyperparameters, PassAccumulator, PassMetrics, Result, TrainingHistory,
};
use steer_dataset::{DatasetAdapter, SteeringBatch, SteeringBatcher};
use tracing::info;

use crate::checkpoint::{CheckpointMetadata, CheckpointStore};
use crate::evaluator::evaluate_model;
use crate::model::{ModelDescription, SteeringNet};
use crate::state::{BestSnapshot, TrainerPhase, TrainingState};

/// One epoch of work, as seen by the training loop.
pub trait EpochRunner {
    /// Train over the whole training partition at `learning_rate`.
    fn train_epoch(&mut self, epoch: usize, learning_rate: f64) -> Result<PassMetrics>;

    /// Forward-only pass over the validation partition.
    fn validate(&mut self, epoch: usize) -> Result<PassMetrics>;

    /// Persist the current weights as the best checkpoint.
    fn save_best(&mut self, best: &BestSnapshot, learning_rate: f64) -> Result<()>;
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub final_phase: TrainerPhase,
    pub state: TrainingState,
    pub history: TrainingHistory,
}

pub struct Trainer<'a> {
    hp: &'a Hyperparameters,
}

impl<'a> Trainer<'a> {
    pub fn new(hp: &'a Hyperparameters) -> Self {
        Self { hp }
    }

    /// Run a single epoch and fold it into `state`.
    pub fn step<R: EpochRunner>(
        &self,
        runner: &mut R,
        state: TrainingState,
    ) -> Result<(TrainingState, TrainerPhase, EpochRecord)> {
        let epoch = state.epoch + 1;
        let train = runner.train_epoch(epoch, state.learning_rate)?;
        if !train.loss.is_finite() {
            return Err(Error::Divergence {
                epoch,
                phase: "training",
                value: train.loss,
            });
        }

        let validation = runner.validate(epoch)?;
        let (state, phase) = state.observe(epoch, &validation)?;

        if phase == TrainerPhase::Improved {
            if let Some(best) = &state.best_checkpoint {
                runner.save_best(best, state.learning_rate)?;
            }
        }

        let record = EpochRecord {
            epoch,
            train_loss: train.loss,
            train_accuracy: train.accuracy,
            val_loss: validation.loss,
            val_accuracy: validation.accuracy,
            learning_rate: state.learning_rate,
        };
        info!(
            "Epoch {:>3}/{} | train loss {:.4} acc {:>6.2}% | val loss {:.4} acc {:>6.2}% | lr {:.2e}{}",
            record.epoch,
            self.hp.max_epochs,
            record.train_loss,
            100.0 * record.train_accuracy,
            record.val_loss,
            100.0 * record.val_accuracy,
            record.learning_rate,
            if phase == TrainerPhase::Improved { " (best)" } else { "" }
        );

        Ok((state, phase, record))
    }

    /// Train until early stopping or the epoch limit.
    pub fn fit<R: EpochRunner>(&self, runner: &mut R) -> Result<TrainingOutcome> {
        let mut state = TrainingState::new(self.hp);
        let mut history = TrainingHistory::new();

        loop {
            let (next, _, record) = self.step(runner, state)?;
            state = next;
            history.push(record);

            if let Some(final_phase) = state.termination(self.hp) {
                info!(
                    epoch = state.epoch,
                    best_val_loss = state.best_val_loss,
                    "Training finished: {final_phase} ({})",
                    final_phase.reason()
                );
                return Ok(TrainingOutcome {
                    final_phase,
                    state,
                    history,
                });
            }
        }
    }
}

/// Training and validation partitions with their batching settings.
#[derive(Debug)]
pub struct RunnerData {
    pub train: DatasetAdapter,
    pub validation: DatasetAdapter,
    pub batch_size: usize,
    /// Seed of the per-epoch shuffle
    pub shuffle_seed: u64,
}

/// [`EpochRunner`] backed by a burn model and optimizer.
pub struct ModelRunner<B: AutodiffBackend, O> {
    model: SteeringNet<B>,
    optimizer: O,
    description: ModelDescription,
    data: RunnerData,
    checkpoints: CheckpointStore,
    rng: ChaCha8Rng,
    device: B::Device,
}

impl<B, O> ModelRunner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SteeringNet<B>, B>,
{
    pub fn new(
        model: SteeringNet<B>,
        optimizer: O,
        description: ModelDescription,
        data: RunnerData,
        checkpoints: CheckpointStore,
        device: B::Device,
    ) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(data.shuffle_seed);
        Self {
            model,
            optimizer,
            description,
            data,
            checkpoints,
            rng,
            device,
        }
    }

    pub fn model(&self) -> &SteeringNet<B> {
        &self.model
    }

    pub fn validation(&self) -> &DatasetAdapter {
        &self.data.validation
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }
}

impl<B, O> EpochRunner for ModelRunner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SteeringNet<B>, B>,
{
    fn train_epoch(&mut self, epoch: usize, learning_rate: f64) -> Result<PassMetrics> {
        let train = &self.data.train;

        let mut indices: Vec<usize> = (0..train.len()).collect();
        indices.shuffle(&mut self.rng);

        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut acc = PassAccumulator::new();
        let mut model = self.model.clone();

        for chunk in indices.chunks(self.data.batch_size.max(1)) {
            let items = train.fetch_many(chunk, epoch)?;
            let batch: SteeringBatch<B> =
                Batcher::<B, _, _>::batch(&SteeringBatcher, items, &self.device);
            let n = chunk.len();

            let logits = model.forward(batch.images);
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
            let batch_loss = loss.clone().into_scalar().elem::<f64>();
            if !batch_loss.is_finite() {
                return Err(Error::Divergence {
                    epoch,
                    phase: "training",
                    value: batch_loss,
                });
            }

            let correct = logits
                .argmax(1)
                .reshape([n])
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>() as usize;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = self.optimizer.step(learning_rate, model, grads);
            acc.add_batch(batch_loss, correct, n);
        }

        self.model = model;
        Ok(acc.finish())
    }

    fn validate(&mut self, _epoch: usize) -> Result<PassMetrics> {
        let model = self.model.valid();
        let report = evaluate_model::<B::InnerBackend>(
            &model,
            &self.data.validation,
            self.data.batch_size,
            &self.device,
        )?;
        Ok(report.metrics())
    }

    fn save_best(&mut self, best: &BestSnapshot, learning_rate: f64) -> Result<()> {
        let metadata = CheckpointMetadata::new(
            best.epoch,
            best.val_loss,
            best.val_accuracy,
            learning_rate,
            self.description.clone(),
        );
        self.checkpoints.save(&self.model.valid(), &metadata)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays fixed losses and counts checkpoint writes.
    struct ScriptedRunner {
        train_losses: Vec<f64>,
        val_losses: Vec<f64>,
        learning_rates: Vec<f64>,
        saved_epochs: Vec<usize>,
    }

    impl ScriptedRunner {
        fn new(val_losses: &[f64]) -> Self {
            Self {
                train_losses: vec![1.0; val_losses.len()],
                val_losses: val_losses.to_vec(),
                learning_rates: Vec::new(),
                saved_epochs: Vec::new(),
            }
        }
    }

    impl EpochRunner for ScriptedRunner {
        fn train_epoch(&mut self, epoch: usize, learning_rate: f64) -> Result<PassMetrics> {
            self.learning_rates.push(learning_rate);
            Ok(PassMetrics {
                loss: self.train_losses[epoch - 1],
                accuracy: 0.5,
                num_samples: 8,
            })
        }

        fn validate(&mut self, epoch: usize) -> Result<PassMetrics> {
            Ok(PassMetrics {
                loss: self.val_losses[epoch - 1],
                accuracy: 0.5,
                num_samples: 2,
            })
        }

        fn save_best(&mut self, best: &BestSnapshot, _learning_rate: f64) -> Result<()> {
            self.saved_epochs.push(best.epoch);
            Ok(())
        }
    }

    fn hp(patience: usize, max_epochs: usize) -> Hyperparameters {
        Hyperparameters {
            early_stopping_patience: patience,
            max_epochs,
            ..Hyperparameters::default()
        }
    }

    #[test]
    fn test_fit_stops_early_at_epoch_five() {
        let hp = hp(3, 120);
        let mut runner = ScriptedRunner::new(&[1.0, 0.9, 0.91, 0.93, 0.95, 0.5]);
        let outcome = Trainer::new(&hp).fit(&mut runner).unwrap();

        assert_eq!(outcome.final_phase, TrainerPhase::EarlyStopped);
        assert_eq!(outcome.state.epoch, 5);
        assert_eq!(outcome.history.len(), 5);
        assert_eq!(runner.saved_epochs, vec![1, 2]);
        assert_eq!(outcome.state.best_checkpoint.unwrap().epoch, 2);
    }

    #[test]
    fn test_fit_completes_at_max_epochs() {
        let hp = hp(30, 3);
        let mut runner = ScriptedRunner::new(&[1.0, 0.8, 0.9]);
        let outcome = Trainer::new(&hp).fit(&mut runner).unwrap();

        assert_eq!(outcome.final_phase, TrainerPhase::Completed);
        assert_eq!(outcome.history.len(), 3);
        assert_eq!(outcome.history.best_epoch().unwrap().epoch, 2);
    }

    #[test]
    fn test_non_finite_training_loss_diverges_without_checkpoint() {
        let hp = hp(30, 10);
        let mut runner = ScriptedRunner::new(&[1.0, 0.5, 0.4]);
        runner.train_losses[1] = f64::INFINITY;

        let err = Trainer::new(&hp).fit(&mut runner).unwrap_err();
        assert!(matches!(
            err,
            Error::Divergence {
                epoch: 2,
                phase: "training",
                ..
            }
        ));
        assert_eq!(runner.saved_epochs, vec![1]);
    }

    #[test]
    fn test_non_finite_validation_loss_diverges() {
        let hp = hp(30, 10);
        let mut runner = ScriptedRunner::new(&[1.0, f64::NAN]);
        let err = Trainer::new(&hp).fit(&mut runner).unwrap_err();
        assert!(matches!(err, Error::Divergence { phase: "validation", .. }));
        assert_eq!(runner.saved_epochs, vec![1]);
    }

    #[test]
    fn test_reduced_rate_reaches_next_epoch() {
        let hp = Hyperparameters {
            scheduler_patience: 1,
            ..hp(30, 4)
        };
        let mut runner = ScriptedRunner::new(&[1.0, 1.0, 1.0, 1.0]);
        let outcome = Trainer::new(&hp).fit(&mut runner).unwrap();

        // Two bad epochs exceed a patience of one; epoch 4 trains at the reduced rate.
        assert_eq!(runner.learning_rates[..3], [1e-3, 1e-3, 1e-3]);
        assert!((runner.learning_rates[3] - 1e-4).abs() < 1e-12);
        assert!((outcome.history.epochs[2].learning_rate - 1e-4).abs() < 1e-12);
    }
}
