//! End-to-end runs on tiny data with a narrow ResNet-18.

use std::fs;
use std::path::Path;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use image::{ImageBuffer, Rgb};
use steer_core::{
    Backbone, Direction, Hyperparameters, ModelConfig, PreprocessConfig, RunConfig, Sample,
    TrainingHistory, SAMPLE_LEN,
};
use steer_dataset::SampleStore;
use steer_training::{
    run, train_and_evaluate, CheckpointStore, TrainerPhase, HISTORY_FILE, SPLIT_FILE,
};
use tempfile::TempDir;

type TestBackend = Autodiff<NdArray<f32>>;

fn tiny_config(output_dir: &Path, max_epochs: usize) -> RunConfig {
    RunConfig {
        hyperparameters: Hyperparameters {
            batch_size: 4,
            max_epochs,
            ..Hyperparameters::default()
        },
        model: ModelConfig {
            backbone: Backbone::ResNet18,
            base_width: 4,
            ..ModelConfig::default()
        },
        output_dir: output_dir.to_path_buf(),
        ..RunConfig::default()
    }
}

fn synthetic_store(n: usize) -> SampleStore {
    let samples = (0..n)
        .map(|i| {
            let class = Direction::ALL[i % 3];
            let pixels = (0..SAMPLE_LEN)
                .map(|j| {
                    let base = (class.label() as f32 - 1.0) * 0.5;
                    base + ((i * 13 + j) % 11) as f32 / 50.0
                })
                .collect();
            Sample::new(pixels, class).unwrap()
        })
        .collect();
    SampleStore::from_samples(samples)
}

#[test]
fn test_checkpoint_reproduces_recorded_validation_loss() {
    let out = TempDir::new().unwrap();
    let config = tiny_config(out.path(), 2);
    let store = synthetic_store(12);
    let split = store.split(0.2, config.seed).unwrap();
    assert_eq!(split.validation.len(), 3);

    let device = Default::default();
    let summary = train_and_evaluate::<TestBackend>(&config, &store, &split, &device).unwrap();

    assert_eq!(summary.final_phase, TrainerPhase::Completed);
    assert_eq!(summary.stopped_at_epoch, 2);
    assert_eq!(summary.final_eval.num_samples, 3);
    assert!(
        (summary.final_eval.loss - summary.best_val_loss).abs() < 1e-4,
        "reloaded {} vs recorded {}",
        summary.final_eval.loss,
        summary.best_val_loss
    );

    let checkpoint = CheckpointStore::new(out.path()).load().unwrap();
    assert_eq!(checkpoint.metadata.epoch, summary.best_epoch);
    assert_eq!(checkpoint.metadata.val_loss, summary.best_val_loss);

    let history = TrainingHistory::load_json(&out.path().join(HISTORY_FILE)).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.best_epoch().unwrap().epoch, summary.best_epoch);
}

#[test]
fn test_run_from_class_directories() {
    let data = TempDir::new().unwrap();
    for (c, class) in Direction::ALL.iter().enumerate() {
        let dir = data.path().join(class.dir_name());
        fs::create_dir(&dir).unwrap();
        for i in 0..3u32 {
            let img = ImageBuffer::from_fn(30, 20, |x, y| {
                Rgb([(c as u32 * 80) as u8, (x * 8 + i) as u8, (y * 10) as u8])
            });
            img.save(dir.join(format!("frame_{i}.png"))).unwrap();
        }
    }

    let out = TempDir::new().unwrap();
    let mut config = tiny_config(out.path(), 1);
    config.data.data_dir = data.path().to_path_buf();
    config.data.preprocess = PreprocessConfig {
        frame_width: 30,
        frame_height: 20,
        ..PreprocessConfig::default()
    };

    let device = Default::default();
    let summary = run::<TestBackend>(&config, &device).unwrap();

    assert_eq!(summary.stopped_at_epoch, 1);
    assert_eq!(summary.best_epoch, 1);
    assert_eq!(summary.final_eval.num_samples, 2);
    assert!(out.path().join(SPLIT_FILE).exists());
    assert!(out.path().join("best_model.json").exists());
    assert!(out.path().join("best_model.bin").exists());

    // A second run reuses the persisted split.
    let before = fs::read_to_string(out.path().join(SPLIT_FILE)).unwrap();
    run::<TestBackend>(&config, &device).unwrap();
    let after = fs::read_to_string(out.path().join(SPLIT_FILE)).unwrap();
    assert_eq!(before, after);
}
