//! Steering classifier training CLI
//!
//! Loads a TOML run configuration, applies command-line overrides and
//! trains until early stopping or the epoch limit.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::{error, info};

use steer_core::{load_toml_config, setup_cli_logging, RunConfig};
use steer_training::{backend_name, default_device, run, RunSummary, TrainingBackend};

/// Train the steering classifier on go/left/right frame directories
#[derive(Parser, Debug)]
#[command(name = "steer-train")]
#[command(version)]
#[command(about = "Train the steering classifier", long_about = None)]
struct Args {
    /// Run configuration (TOML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the go/, left/ and right/ subdirectories
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Output directory for checkpoint, split and history
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum number of epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Draw a new train/validation split even if one is persisted
    #[arg(long, default_value = "false")]
    reshuffle: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

impl Args {
    fn run_config(&self) -> Result<RunConfig> {
        let mut config: RunConfig = match &self.config {
            Some(path) => load_toml_config(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RunConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config.data.data_dir = dir.clone();
        }
        if let Some(dir) = &self.output {
            config.output_dir = dir.clone();
        }
        if let Some(epochs) = self.epochs {
            config.hyperparameters.max_epochs = epochs;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.data.reshuffle |= self.reshuffle;

        config.validate().context("invalid run configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let config = args.run_config()?;

    println!("{}", "Steering Classifier Training".green().bold());
    println!("  Backend:   {}", backend_name());
    println!("  Data:      {}", config.data.data_dir.display());
    println!("  Output:    {}", config.output_dir.display());
    println!("  Backbone:  {:?}", config.model.backbone);
    println!("  Epochs:    {}", config.hyperparameters.max_epochs);
    println!();

    let device = default_device();
    let summary = match run::<TrainingBackend>(&config, &device) {
        Ok(summary) => summary,
        Err(e) => {
            error!("Training aborted: {e}");
            return Err(e).context("training failed");
        }
    };

    print_summary(&summary);
    info!("Artifacts written to {}", summary.output_dir.display());
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Training Complete".green().bold());
    println!(
        "  Stopped after epoch {} ({}: {})",
        summary.stopped_at_epoch,
        summary.final_phase,
        summary.final_phase.reason()
    );
    println!(
        "  Best epoch {}: val loss {:.4}",
        summary.best_epoch, summary.best_val_loss
    );
    println!(
        "  Best checkpoint: loss {:.4}, accuracy {:.2}% on {} samples",
        summary.final_eval.loss,
        100.0 * summary.final_eval.accuracy,
        summary.final_eval.num_samples
    );
    for (direction, recall) in summary.final_eval.per_class_recall() {
        let recall = match recall {
            Some(r) => format!("{:.2}%", 100.0 * r),
            None => "n/a".to_string(),
        };
        println!("    {:<6} recall {}", direction.to_string(), recall);
    }
}
