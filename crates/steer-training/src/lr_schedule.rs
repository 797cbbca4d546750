//! Reduce-on-plateau learning rate schedule.
//!
//! Monitors a loss (lower is better). An epoch counts as an improvement only
//! if it beats the best value by a relative `threshold`. Once more than
//! `patience` bad epochs pile up, the rate is multiplied by `factor`, clamped
//! at `min_lr`, and the bad-epoch count restarts.

use serde::{Deserialize, Serialize};
use steer_core::Hyperparameters;
use tracing::info;

/// Reductions smaller than this are ignored.
const MIN_LR_DELTA: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub threshold: f64,
    pub min_lr: f64,
}

impl From<&Hyperparameters> for PlateauConfig {
    fn from(hp: &Hyperparameters) -> Self {
        Self {
            factor: hp.lr_reduction_factor,
            patience: hp.scheduler_patience,
            threshold: hp.scheduler_threshold,
            min_lr: hp.min_learning_rate,
        }
    }
}

/// Scheduler state; a plain value so it can live inside the training state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRateScheduler {
    config: PlateauConfig,
    current_lr: f64,
    best_metric: f64,
    bad_epochs: usize,
}

impl LearningRateScheduler {
    pub fn new(config: PlateauConfig, base_lr: f64) -> Self {
        Self {
            config,
            current_lr: base_lr,
            best_metric: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    pub fn from_hyperparameters(hp: &Hyperparameters) -> Self {
        Self::new(PlateauConfig::from(hp), hp.learning_rate)
    }

    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    pub fn bad_epochs(&self) -> usize {
        self.bad_epochs
    }

    /// Feed one epoch's metric and return the learning rate for the next epoch.
    pub fn step_with_metric(&mut self, metric: f64) -> f64 {
        if metric < self.best_metric * (1.0 - self.config.threshold) {
            self.best_metric = metric;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }

        if self.bad_epochs > self.config.patience {
            let new_lr = (self.current_lr * self.config.factor).max(self.config.min_lr);
            if self.current_lr - new_lr > MIN_LR_DELTA {
                info!("Reducing learning rate: {:.2e} -> {:.2e}", self.current_lr, new_lr);
                self.current_lr = new_lr;
            }
            self.bad_epochs = 0;
        }

        self.current_lr
    }
}
