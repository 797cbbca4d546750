//! Training state and the pure per-epoch transition.

use serde::{Deserialize, Serialize};
use steer_core::{Error, Hyperparameters, PassMetrics, Result};

use crate::lr_schedule::LearningRateScheduler;

/// Where the loop stands after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerPhase {
    Running,
    /// Validation loss strictly improved; a checkpoint is due
    Improved,
    Plateaued,
    EarlyStopped,
    Completed,
}

impl TrainerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TrainerPhase::EarlyStopped | TrainerPhase::Completed)
    }

    /// Human-readable reason, used when the run ends.
    pub fn reason(self) -> &'static str {
        match self {
            TrainerPhase::Running => "still running",
            TrainerPhase::Improved => "validation loss improved",
            TrainerPhase::Plateaued => "validation loss did not improve",
            TrainerPhase::EarlyStopped => "early-stopping patience exhausted",
            TrainerPhase::Completed => "maximum number of epochs reached",
        }
    }
}

impl std::fmt::Display for TrainerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrainerPhase::Running => "running",
            TrainerPhase::Improved => "improved",
            TrainerPhase::Plateaued => "plateaued",
            TrainerPhase::EarlyStopped => "early_stopped",
            TrainerPhase::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

/// Epoch and metrics of the best checkpoint so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestSnapshot {
    pub epoch: usize,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Last completed epoch, 1-based; 0 before training
    pub epoch: usize,
    /// Rate used for the next epoch
    pub learning_rate: f64,
    pub best_val_loss: f64,
    pub epochs_since_improvement: usize,
    pub best_checkpoint: Option<BestSnapshot>,
    pub scheduler: LearningRateScheduler,
}

impl TrainingState {
    pub fn new(hp: &Hyperparameters) -> Self {
        Self {
            epoch: 0,
            learning_rate: hp.learning_rate,
            best_val_loss: f64::INFINITY,
            epochs_since_improvement: 0,
            best_checkpoint: None,
            scheduler: LearningRateScheduler::from_hyperparameters(hp),
        }
    }

    /// Fold one epoch's validation result into a new state.
    ///
    /// Returns [`TrainerPhase::Improved`] on a strict decrease of the
    /// validation loss and [`TrainerPhase::Plateaued`] otherwise. A
    /// non-finite loss is a [`Error::Divergence`] and yields no state.
    pub fn observe(mut self, epoch: usize, validation: &PassMetrics) -> Result<(Self, TrainerPhase)> {
        if !validation.loss.is_finite() {
            return Err(Error::Divergence {
                epoch,
                phase: "validation",
                value: validation.loss,
            });
        }

        self.epoch = epoch;
        self.learning_rate = self.scheduler.step_with_metric(validation.loss);

        let phase = if validation.loss < self.best_val_loss {
            self.best_val_loss = validation.loss;
            self.epochs_since_improvement = 0;
            self.best_checkpoint = Some(BestSnapshot {
                epoch,
                val_loss: validation.loss,
                val_accuracy: validation.accuracy,
            });
            TrainerPhase::Improved
        } else {
            self.epochs_since_improvement += 1;
            TrainerPhase::Plateaued
        };

        Ok((self, phase))
    }

    /// Terminal phase reached by this state, if any.
    ///
    /// Early stopping wins when both conditions hold in the same epoch.
    pub fn termination(&self, hp: &Hyperparameters) -> Option<TrainerPhase> {
        if self.epochs_since_improvement >= hp.early_stopping_patience {
            Some(TrainerPhase::EarlyStopped)
        } else if self.epoch >= hp.max_epochs {
            Some(TrainerPhase::Completed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(loss: f64) -> PassMetrics {
        PassMetrics {
            loss,
            accuracy: 0.5,
            num_samples: 10,
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
    fn test_early_stop_after_patience() {
        let hp = hp(3, 120);
        let mut state = TrainingState::new(&hp);
        let mut phases = Vec::new();
        let mut stopped_at = None;

        for (i, loss) in [1.0, 0.9, 0.91, 0.93, 0.95].into_iter().enumerate() {
            let epoch = i + 1;
            let (next, phase) = state.observe(epoch, &metrics(loss)).unwrap();
            state = next;
            phases.push(phase);
            if let Some(end) = state.termination(&hp) {
                assert_eq!(end, TrainerPhase::EarlyStopped);
                stopped_at = Some(epoch);
                break;
            }
        }

        assert_eq!(stopped_at, Some(5));
        assert_eq!(
            phases,
            vec![
                TrainerPhase::Improved,
                TrainerPhase::Improved,
                TrainerPhase::Plateaued,
                TrainerPhase::Plateaued,
                TrainerPhase::Plateaued,
            ]
        );
        let best = state.best_checkpoint.unwrap();
        assert_eq!(best.epoch, 2);
        assert_eq!(best.val_loss, 0.9);
    }

    #[test]
    fn test_equal_loss_is_not_improvement() {
        let hp = hp(30, 120);
        let (state, _) = TrainingState::new(&hp).observe(1, &metrics(0.5)).unwrap();
        let (state, phase) = state.observe(2, &metrics(0.5)).unwrap();
        assert_eq!(phase, TrainerPhase::Plateaued);
        assert_eq!(state.epochs_since_improvement, 1);
        assert_eq!(state.best_checkpoint.unwrap().epoch, 1);
    }

    #[test]
    fn test_completed_at_max_epochs() {
        let hp = hp(30, 2);
        let state = TrainingState::new(&hp);
        let (state, _) = state.observe(1, &metrics(1.0)).unwrap();
        assert_eq!(state.termination(&hp), None);
        let (state, _) = state.observe(2, &metrics(0.8)).unwrap();
        assert_eq!(state.termination(&hp), Some(TrainerPhase::Completed));
    }

    #[test]
    fn test_non_finite_validation_loss_diverges() {
        let hp = hp(30, 120);
        let err = TrainingState::new(&hp).observe(3, &metrics(f64::NAN)).unwrap_err();
        assert!(matches!(
            err,
            Error::Divergence {
                epoch: 3,
                phase: "validation",
                ..
            }
        ));
    }

    #[test]
    fn test_learning_rate_follows_scheduler() {
        let hp = Hyperparameters {
            scheduler_patience: 0,
            ..hp(30, 120)
        };
        let (state, _) = TrainingState::new(&hp).observe(1, &metrics(1.0)).unwrap();
        assert_eq!(state.learning_rate, 1e-3);
        let (state, _) = state.observe(2, &metrics(1.0)).unwrap();
        assert!((state.learning_rate - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_phase_helpers() {
        assert!(TrainerPhase::EarlyStopped.is_terminal());
        assert!(!TrainerPhase::Improved.is_terminal());
        assert_eq!(TrainerPhase::EarlyStopped.to_string(), "early_stopped");
    }
}
