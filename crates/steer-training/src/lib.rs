//! Steering classifier training.
//!
//! A residual network adapted to 64x64 frames, trained with Adam under a
//! reduce-on-plateau schedule and early stopping. The best model by
//! validation loss is checkpointed and re-evaluated when the run ends.

pub mod backend;
pub mod checkpoint;
pub mod evaluator;
pub mod lr_schedule;
pub mod model;
pub mod run;
pub mod state;
pub mod trainer;

pub use backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
pub use checkpoint::{Checkpoint, CheckpointMetadata, CheckpointStore};
pub use evaluator::{evaluate_model, EvaluationReport, Evaluator};
pub use lr_schedule::{LearningRateScheduler, PlateauConfig};
pub use model::{ModelBuilder, ModelDescription, PretrainedSource, SteeringNet};
pub use run::{run, train_and_evaluate, RunSummary, HISTORY_FILE, SPLIT_FILE};
pub use state::{BestSnapshot, TrainerPhase, TrainingState};
pub use trainer::{EpochRunner, ModelRunner, RunnerData, Trainer, TrainingOutcome};
