//! Steering checkpoint evaluation CLI
//!
//! Rebuilds the validation partition recorded next to a checkpoint and
//! reports loss, accuracy and the confusion matrix of the best model.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use steer_core::{load_toml_config, setup_cli_logging, DataSplit, Direction, RunConfig};
use steer_dataset::{DatasetAdapter, DatasetSplit, Normalizer, Preprocessor, SampleStore};
use steer_training::{
    backend_name, default_device, CheckpointStore, DefaultBackend, EvaluationReport, Evaluator,
    SPLIT_FILE,
};

#[derive(Parser, Debug)]
#[command(name = "steer-evaluate")]
#[command(version)]
#[command(about = "Evaluate the best steering checkpoint", long_about = None)]
struct Args {
    /// Run configuration used for training (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding best_model.bin, best_model.json and split.json
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let mut config: RunConfig = match &args.config {
        Some(path) => {
            load_toml_config(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => RunConfig::default(),
    };
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }

    let checkpoint = CheckpointStore::new(&config.output_dir)
        .load()
        .context("no checkpoint to evaluate")?;

    let split_path = config.output_dir.join(SPLIT_FILE);
    let split = DatasetSplit::load(&split_path)
        .with_context(|| format!("reading split {}", split_path.display()))?;

    let preprocessor = Preprocessor::new(config.data.preprocess.clone())?;
    let store = SampleStore::from_directory(
        &config.data.data_dir,
        &preprocessor,
        config.data.strictness,
        config.data.num_workers,
    )?;
    let samples = store
        .partition(&split, DataSplit::Validation)
        .context("dataset changed since the split was written")?;
    let adapter = DatasetAdapter::plain(samples, Normalizer::from(&config.augmentation));

    let evaluator =
        Evaluator::<DefaultBackend>::new(default_device(), config.hyperparameters.batch_size);
    let report = evaluator.evaluate(&checkpoint, &adapter)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Checkpoint Evaluation".green().bold());
    println!("  Backend:    {}", backend_name());
    println!(
        "  Checkpoint: epoch {}, recorded val loss {:.4} ({})",
        checkpoint.metadata.epoch, checkpoint.metadata.val_loss, checkpoint.metadata.timestamp
    );
    println!();
    print_report(&report);
    Ok(())
}

fn print_report(report: &EvaluationReport) {
    println!(
        "  Loss {:.4} | Accuracy {} | {} samples",
        report.loss,
        format!("{:.2}%", 100.0 * report.accuracy).cyan().bold(),
        report.num_samples
    );
    println!();

    print!("  {:>8}", "");
    for predicted in Direction::ALL {
        print!("{:>8}", predicted.to_string());
    }
    println!("{:>10}", "recall");

    for (actual, row) in Direction::ALL.into_iter().zip(report.confusion.counts()) {
        print!("  {:>8}", actual.to_string());
        for count in row {
            print!("{count:>8}");
        }
        match report.confusion.recall(actual.label()) {
            Some(r) => println!("{:>9.1}%", 100.0 * r),
            None => println!("{:>10}", "n/a"),
        }
    }
}
