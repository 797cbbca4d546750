//! Best-model checkpoint: burn record for the weights, JSON for the metadata.
//!
//! The weights are written first. The metadata file is written to a
//! temporary name, flushed, synced and renamed, so a metadata file on disk
//! always describes weights that were fully written.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use steer_core::{Error, Result};
use tracing::info;

use crate::model::{ModelDescription, SteeringNet};

const CHECKPOINT_NAME: &str = "best_model";

/// What the checkpoint was taken from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub epoch: usize,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
    pub timestamp: String,
    /// Layout needed to rebuild the network before loading the weights
    pub description: ModelDescription,
}

impl CheckpointMetadata {
    pub fn new(
        epoch: usize,
        val_loss: f64,
        val_accuracy: f64,
        learning_rate: f64,
        description: ModelDescription,
    ) -> Self {
        Self {
            epoch,
            val_loss,
            val_accuracy,
            learning_rate,
            timestamp: chrono::Utc::now().to_rfc3339(),
            description,
        }
    }
}

/// A persisted checkpoint: record path (without extension) plus metadata.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub weights: PathBuf,
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Rebuild the network from the stored layout and load the weights.
    pub fn load_model<B: Backend>(&self, device: &B::Device) -> Result<SteeringNet<B>> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.metadata
            .description
            .init::<B>(device)
            .load_file(self.weights.clone(), &recorder, device)
            .map_err(|e| Error::checkpoint(&self.weights, format!("{e:?}")))
    }
}

/// Location of the best checkpoint inside an output directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record path handed to burn, which appends `.bin`.
    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_NAME}.json"))
    }

    pub fn exists(&self) -> bool {
        self.metadata_path().exists()
    }

    /// Persist `model` as the new best checkpoint.
    pub fn save<B: Backend>(
        &self,
        model: &SteeringNet<B>,
        metadata: &CheckpointMetadata,
    ) -> Result<Checkpoint> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::checkpoint(&self.dir, e))?;

        let weights = self.weights_path();
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(weights.clone(), &recorder)
            .map_err(|e| Error::checkpoint(&weights, format!("{e:?}")))?;

        let path = self.metadata_path();
        write_json_atomic(&path, metadata).map_err(|e| Error::checkpoint(&path, e))?;

        info!(
            epoch = metadata.epoch,
            val_loss = metadata.val_loss,
            "Checkpoint saved to {}",
            path.display()
        );
        Ok(Checkpoint {
            weights,
            metadata: metadata.clone(),
        })
    }

    /// Read back the metadata of the stored checkpoint.
    pub fn load(&self) -> Result<Checkpoint> {
        let path = self.metadata_path();
        let json = fs::read_to_string(&path).map_err(|e| Error::checkpoint(&path, e))?;
        let metadata: CheckpointMetadata =
            serde_json::from_str(&json).map_err(|e| Error::checkpoint(&path, e))?;

        Ok(Checkpoint {
            weights: self.weights_path(),
            metadata,
        })
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)
}
