//! Configuration structures for a training run.
//!
//! Every record is `serde(default)` so a TOML file only needs to name the
//! values it overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ChannelOrder;
use crate::{Error, Result};

/// Top-level configuration for one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Optimisation hyperparameters
    pub hyperparameters: Hyperparameters,
    /// Dataset location, split and loading policy
    pub data: DataConfig,
    /// Training-time augmentation
    pub augmentation: AugmentationConfig,
    /// Network configuration
    pub model: ModelConfig,
    /// Directory receiving checkpoint, split and history files
    pub output_dir: PathBuf,
    /// Seed for weight init, shuffling and augmentation
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            hyperparameters: Hyperparameters::default(),
            data: DataConfig::default(),
            augmentation: AugmentationConfig::default(),
            model: ModelConfig::default(),
            output_dir: PathBuf::from("artifacts"),
            seed: 42,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        self.hyperparameters.validate()?;
        self.data.validate()?;
        self.augmentation.validate()?;
        if self.model.num_classes == 0 {
            return Err(Error::Config("num_classes must be positive".to_string()));
        }
        Ok(())
    }
}

/// Immutable optimisation settings, built once and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    /// L2 penalty added to the gradients by the optimizer
    pub weight_decay: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Epochs without strict validation-loss improvement before stopping
    pub early_stopping_patience: usize,
    /// Bad epochs tolerated by the plateau scheduler before reducing the LR
    pub scheduler_patience: usize,
    /// Multiplier applied to the LR on plateau
    pub lr_reduction_factor: f64,
    /// Relative improvement the scheduler needs to count an epoch as good
    pub scheduler_threshold: f64,
    pub min_learning_rate: f64,
    /// Dropout probability in the classification head
    pub dropout: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 1e-3,
            batch_size: 64,
            max_epochs: 120,
            early_stopping_patience: 30,
            scheduler_patience: 4,
            lr_reduction_factor: 0.1,
            scheduler_threshold: 1e-4,
            min_learning_rate: 1e-6,
            dropout: 0.6,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::Config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if self.batch_size == 0 || self.max_epochs == 0 {
            return Err(Error::Config(
                "batch_size and max_epochs must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(self.lr_reduction_factor > 0.0 && self.lr_reduction_factor < 1.0) {
            return Err(Error::Config(format!(
                "lr_reduction_factor must be in (0, 1), got {}",
                self.lr_reduction_factor
            )));
        }
        if self.min_learning_rate < 0.0 || self.min_learning_rate > self.learning_rate {
            return Err(Error::Config(format!(
                "min_learning_rate must be in [0, learning_rate], got {}",
                self.min_learning_rate
            )));
        }
        Ok(())
    }
}

/// What to do with a frame that cannot be decoded or has the wrong geometry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameStrictness {
    /// Log a warning and leave the file out of the dataset
    #[default]
    Skip,
    /// Fail dataset construction
    Abort,
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root holding the `go`, `left` and `right` class directories
    pub data_dir: PathBuf,
    /// Share of samples held out for validation
    pub validation_fraction: f64,
    /// Seed for the split; falls back to the run seed
    pub split_seed: Option<u64>,
    /// Draw a new split even if one is already persisted
    pub reshuffle: bool,
    pub strictness: FrameStrictness,
    /// Loader threads, 0 lets rayon decide
    pub num_workers: usize,
    pub preprocess: PreprocessConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            validation_fraction: 0.2,
            split_seed: None,
            reshuffle: false,
            strictness: FrameStrictness::Skip,
            num_workers: 0,
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(Error::Config(format!(
                "validation_fraction must be in (0, 1), got {}",
                self.validation_fraction
            )));
        }
        self.preprocess.validate()
    }
}

/// Geometry of the raw-frame to sample transform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Expected raw frame width
    pub frame_width: u32,
    /// Expected raw frame height
    pub frame_height: u32,
    /// Square size the frame is resized to before cropping
    pub intermediate_size: u32,
    /// Rows removed from the top of the resized frame
    pub crop_top: u32,
    /// Side of the output sample
    pub output_size: u32,
    /// Channel order the model is trained on
    pub target_order: ChannelOrder,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            frame_width: 1500,
            frame_height: 1000,
            intermediate_size: 512,
            crop_top: 200,
            output_size: 64,
            target_order: ChannelOrder::Rgb,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.crop_top >= self.intermediate_size {
            return Err(Error::Config(format!(
                "crop_top ({}) must be smaller than intermediate_size ({})",
                self.crop_top, self.intermediate_size
            )));
        }
        if self.output_size as usize != crate::types::SAMPLE_SIZE {
            return Err(Error::Config(format!(
                "output_size must be {}, got {}",
                crate::types::SAMPLE_SIZE,
                self.output_size
            )));
        }
        Ok(())
    }
}

/// Data augmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Rotation angle drawn from [-rotation_degrees, rotation_degrees]
    pub rotation_degrees: f32,
    /// Maximum shift as a fraction of (width, height)
    pub translate: (f32, f32),
    /// Area fraction range for the random resized crop
    pub crop_scale: (f32, f32),
    /// Aspect ratio range for the random resized crop
    pub crop_ratio: (f32, f32),
    /// Per-channel normalization mean
    pub mean: [f32; 3],
    /// Per-channel normalization standard deviation
    pub std: [f32; 3],
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            translate: (0.05, 0.05),
            crop_scale: (0.9, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

impl AugmentationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rotation_degrees >= 0.0 && self.rotation_degrees <= 180.0) {
            return Err(Error::Config(format!(
                "rotation_degrees must be in [0, 180], got {}",
                self.rotation_degrees
            )));
        }
        let (tx, ty) = self.translate;
        if !((0.0..1.0).contains(&tx) && (0.0..1.0).contains(&ty)) {
            return Err(Error::Config(format!(
                "translate fractions must be in [0, 1), got ({tx}, {ty})"
            )));
        }
        let (lo, hi) = self.crop_scale;
        if !(lo > 0.0 && lo <= hi && hi <= 1.0) {
            return Err(Error::Config(format!(
                "crop_scale must satisfy 0 < min <= max <= 1, got ({lo}, {hi})"
            )));
        }
        if self.crop_ratio.0 <= 0.0 || self.crop_ratio.0 > self.crop_ratio.1 {
            return Err(Error::Config(format!(
                "crop_ratio must satisfy 0 < min <= max, got {:?}",
                self.crop_ratio
            )));
        }
        if self.std.iter().any(|s| *s <= 0.0) {
            return Err(Error::Config("std values must be positive".to_string()));
        }
        Ok(())
    }
}

/// Residual backbone family
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    ResNet18,
    #[default]
    ResNet34,
}

impl Backbone {
    /// Basic blocks per residual stage.
    pub fn blocks_per_stage(self) -> [usize; 4] {
        match self {
            Backbone::ResNet18 => [2, 2, 2, 2],
            Backbone::ResNet34 => [3, 4, 6, 3],
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub backbone: Backbone,
    /// Channels of the first stage; later stages double it
    pub base_width: usize,
    pub num_classes: usize,
    /// Hidden units of the classification head
    pub head_hidden: usize,
    /// Pretrained trunk weights: a burn record, or a torchvision `.pt`/`.pth` file
    pub pretrained_path: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backbone: Backbone::ResNet34,
            base_width: 64,
            num_classes: 3,
            head_hidden: 32,
            pretrained_path: None,
        }
    }
}
