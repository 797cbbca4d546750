//! Uniform sample fetch for the training loop, plus the burn batcher.
//!
//! The two adapter variants are fixed at construction: training samples go
//! through the augmentation pipeline, validation samples only through the
//! normalizer.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rayon::prelude::*;
use steer_core::{DataSplit, Error, Result, Sample, SAMPLE_SIZE};

use crate::augmentation::{sample_rng, AugmentationPipeline, Normalizer};

/// A sample ready for batching: normalized CHW floats and the label.
#[derive(Debug, Clone, PartialEq)]
pub struct SteeringItem {
    pub image: Vec<f32>,
    pub label: usize,
}

/// Fetches partition samples as [`SteeringItem`]s.
pub enum DatasetAdapter {
    /// Fresh augmentation on every fetch, keyed by (seed, epoch, index).
    Augmented {
        samples: Arc<Vec<Sample>>,
        pipeline: Arc<AugmentationPipeline>,
        seed: u64,
    },
    /// Range conversion and normalization only.
    Plain {
        samples: Arc<Vec<Sample>>,
        normalizer: Normalizer,
    },
}

impl DatasetAdapter {
    pub fn augmented(samples: Vec<Sample>, pipeline: Arc<AugmentationPipeline>, seed: u64) -> Self {
        DatasetAdapter::Augmented {
            samples: Arc::new(samples),
            pipeline,
            seed,
        }
    }

    pub fn plain(samples: Vec<Sample>, normalizer: Normalizer) -> Self {
        DatasetAdapter::Plain {
            samples: Arc::new(samples),
            normalizer,
        }
    }

    fn samples(&self) -> &[Sample] {
        match self {
            DatasetAdapter::Augmented { samples, .. } | DatasetAdapter::Plain { samples, .. } => {
                samples
            }
        }
    }

    /// Which partition this adapter serves.
    pub fn split(&self) -> DataSplit {
        match self {
            DatasetAdapter::Augmented { .. } => DataSplit::Train,
            DatasetAdapter::Plain { .. } => DataSplit::Validation,
        }
    }

    pub fn len(&self) -> usize {
        self.samples().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples().is_empty()
    }

    /// Fetch one sample as seen in `epoch`.
    pub fn fetch(&self, index: usize, epoch: usize) -> Result<SteeringItem> {
        let sample = self.samples().get(index).ok_or_else(|| {
            Error::Dataset(format!(
                "index {index} out of range for {} {} samples",
                self.len(),
                self.split()
            ))
        })?;

        let image = match self {
            DatasetAdapter::Augmented { pipeline, seed, .. } => {
                pipeline.augment(sample, &mut sample_rng(*seed, epoch, index))
            }
            DatasetAdapter::Plain { normalizer, .. } => normalizer.from_sample(sample),
        };

        Ok(SteeringItem {
            image,
            label: sample.label().label(),
        })
    }

    /// Fetch several samples in parallel, preserving the order of `indices`.
    pub fn fetch_many(&self, indices: &[usize], epoch: usize) -> Result<Vec<SteeringItem>> {
        indices
            .par_iter()
            .map(|&i| self.fetch(i, epoch))
            .collect()
    }
}

impl std::fmt::Debug for DatasetAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetAdapter")
            .field("split", &self.split())
            .field("len", &self.len())
            .finish()
    }
}

/// A batch of items on a device.
#[derive(Clone, Debug)]
pub struct SteeringBatch<B: Backend> {
    /// Shape [batch_size, 3, 64, 64]
    pub images: Tensor<B, 4>,
    /// Shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items into tensors. Items are already normalized.
#[derive(Clone, Debug, Default)]
pub struct SteeringBatcher;

impl<B: Backend> Batcher<B, SteeringItem, SteeringBatch<B>> for SteeringBatcher {
    fn batch(&self, items: Vec<SteeringItem>, device: &B::Device) -> SteeringBatch<B> {
        let batch_size = items.len();

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let images_data: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, SAMPLE_SIZE, SAMPLE_SIZE]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        SteeringBatch { images, targets }
    }
}
