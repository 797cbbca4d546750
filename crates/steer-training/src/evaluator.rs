//! Inference pass over a dataset adapter, and evaluation of checkpoints.
//!
//! [`evaluate_model`] is the single pass used both for the trainer's
//! validation and for evaluating a reloaded checkpoint, so the two report
//! the same loss for the same weights.

use burn::data::dataloader::batcher::Batcher;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use steer_core::{ConfusionMatrix, DataSplit, Direction, PassAccumulator, PassMetrics, Result};
use steer_dataset::{DatasetAdapter, SteeringBatch, SteeringBatcher};
use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::model::SteeringNet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub loss: f64,
    pub accuracy: f64,
    pub num_samples: usize,
    pub confusion: ConfusionMatrix,
}

impl EvaluationReport {
    pub fn metrics(&self) -> PassMetrics {
        PassMetrics {
            loss: self.loss,
            accuracy: self.accuracy,
            num_samples: self.num_samples,
        }
    }

    /// Per-class recall, `None` for classes absent from the data.
    pub fn per_class_recall(&self) -> Vec<(Direction, Option<f64>)> {
        Direction::ALL
            .into_iter()
            .map(|d| (d, self.confusion.recall(d.label())))
            .collect()
    }
}

/// One forward-only pass over `adapter` in index order.
///
/// Batches are fetched for epoch 0; plain adapters ignore the epoch.
pub fn evaluate_model<B: Backend>(
    model: &SteeringNet<B>,
    adapter: &DatasetAdapter,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut acc = PassAccumulator::new();
    let mut confusion = ConfusionMatrix::new(Direction::COUNT);

    let indices: Vec<usize> = (0..adapter.len()).collect();
    for chunk in indices.chunks(batch_size.max(1)) {
        let items = adapter.fetch_many(chunk, 0)?;
        let batch: SteeringBatch<B> = Batcher::<B, _, _>::batch(&SteeringBatcher, items, device);
        let n = chunk.len();

        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        let batch_loss = loss.into_scalar().elem::<f64>();

        let predictions = logits.argmax(1).reshape([n]);
        let predicted: Vec<i64> = predictions.into_data().iter::<i64>().collect();
        let actual: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();

        let mut correct = 0;
        for (&a, &p) in actual.iter().zip(&predicted) {
            confusion.record(a as usize, p as usize);
            if a == p {
                correct += 1;
            }
        }
        acc.add_batch(batch_loss, correct, n);
    }

    let metrics = acc.finish();
    Ok(EvaluationReport {
        loss: metrics.loss,
        accuracy: metrics.accuracy,
        num_samples: metrics.num_samples,
        confusion,
    })
}

/// Evaluates stored checkpoints on a non-autodiff backend.
#[derive(Debug, Clone)]
pub struct Evaluator<B: Backend> {
    device: B::Device,
    batch_size: usize,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(device: B::Device, batch_size: usize) -> Self {
        Self { device, batch_size }
    }

    /// Load `checkpoint` into a fresh model and run one pass over `adapter`.
    pub fn evaluate(
        &self,
        checkpoint: &Checkpoint,
        adapter: &DatasetAdapter,
    ) -> Result<EvaluationReport> {
        if adapter.split() == DataSplit::Train {
            warn!("Evaluating on an augmenting adapter; metrics will vary between calls");
        }

        let model = checkpoint.load_model::<B>(&self.device)?;
        let report = evaluate_model(&model, adapter, self.batch_size, &self.device)?;

        info!(
            epoch = checkpoint.metadata.epoch,
            loss = report.loss,
            accuracy = report.accuracy,
            samples = report.num_samples,
            "Checkpoint evaluated"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelBuilder, PretrainedSource};
    use burn_ndarray::NdArray;
    use steer_core::{AugmentationConfig, Backbone, Sample, SAMPLE_LEN};
    use steer_dataset::Normalizer;

    type TestBackend = NdArray<f32>;

    fn adapter(n: usize) -> DatasetAdapter {
        let samples = (0..n)
            .map(|i| {
                let pixels = (0..SAMPLE_LEN).map(|j| ((i + j) % 7) as f32 / 3.5 - 1.0).collect();
                Sample::new(pixels, Direction::ALL[i % 3]).unwrap()
            })
            .collect();
        DatasetAdapter::plain(samples, Normalizer::from(&AugmentationConfig::default()))
    }

    fn model() -> SteeringNet<TestBackend> {
        ModelBuilder::new(Backbone::ResNet18, PretrainedSource::None)
            .with_base_width(4)
            .build::<TestBackend>(3, 0.6, &Default::default())
            .unwrap()
    }

    #[test]
    fn test_report_covers_every_sample() {
        let device = Default::default();
        let report = evaluate_model(&model(), &adapter(7), 3, &device).unwrap();

        assert_eq!(report.num_samples, 7);
        assert_eq!(report.confusion.total(), 7);
        assert!(report.loss.is_finite() && report.loss > 0.0);
        assert!((report.accuracy - report.confusion.accuracy()).abs() < 1e-12);
        assert_eq!(report.per_class_recall().len(), 3);
    }

    #[test]
    fn test_batch_size_does_not_change_result() {
        let device = Default::default();
        let model = model();
        let data = adapter(6);
        let a = evaluate_model(&model, &data, 6, &device).unwrap();
        let b = evaluate_model(&model, &data, 4, &device).unwrap();

        assert!((a.loss - b.loss).abs() < 1e-5);
        assert_eq!(a.confusion, b.confusion);
    }

    #[test]
    fn test_empty_adapter_gives_zero_report() {
        let device = Default::default();
        let report = evaluate_model(&model(), &adapter(0), 4, &device).unwrap();
        assert_eq!(report.num_samples, 0);
        assert_eq!(report.metrics(), PassMetrics::default());
    }
}
