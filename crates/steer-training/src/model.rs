//! Residual classifier adapted to 64x64 inputs.
//!
//! [`ModelBuilder::describe`] is a pure function: it starts from the ImageNet
//! reference layout and returns a new [`ModelDescription`] with the stem
//! shrunk to a 3x3 stride-1 convolution, the stem max-pool removed and the
//! classification head replaced. Tensors only exist once the description is
//! initialised on a device.
//!
//! Pretrained weights cover the [`Trunk`]: the stem normalization and the
//! four residual stages. The stem convolution and the head are always fresh.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    record::{BinFileRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use serde::{Deserialize, Serialize};
use steer_core::{Backbone, Error, ModelConfig};
use tracing::info;

/// First convolution and optional max-pool.
#[derive(Config, Debug, PartialEq)]
pub struct StemConfig {
    pub channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    /// 3x3 stride-2 max-pool after the first activation
    pub max_pool: bool,
}

impl StemConfig {
    /// 7x7 stride-2 convolution followed by a max-pool.
    pub fn imagenet(channels: usize) -> Self {
        Self::new(channels, 7, 2, 3, true)
    }

    /// Same width, 3x3 stride-1 convolution, no pooling.
    pub fn for_small_inputs(&self) -> Self {
        Self::new(self.channels, 3, 1, 1, false)
    }
}

/// Residual stages of basic blocks.
#[derive(Config, Debug, PartialEq)]
pub struct BodyConfig {
    pub blocks_per_stage: [usize; 4],
    pub widths: [usize; 4],
}

impl BodyConfig {
    pub fn for_backbone(backbone: Backbone, base_width: usize) -> Self {
        Self::new(
            backbone.blocks_per_stage(),
            [base_width, base_width * 2, base_width * 4, base_width * 8],
        )
    }

    pub fn out_features(&self) -> usize {
        self.widths[3]
    }
}

/// Classifier on top of the pooled features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadConfig {
    pub in_features: usize,
    /// Hidden layer size; `None` is a single linear layer
    pub hidden: Option<usize>,
    pub num_classes: usize,
    pub dropout: f64,
}

impl HeadConfig {
    pub fn linear(in_features: usize, num_classes: usize) -> Self {
        Self {
            in_features,
            hidden: None,
            num_classes,
            dropout: 0.0,
        }
    }

    pub fn with_hidden(in_features: usize, hidden: usize, num_classes: usize, dropout: f64) -> Self {
        Self {
            in_features,
            hidden: Some(hidden),
            num_classes,
            dropout,
        }
    }
}

/// Full layout of a classifier, independent of any device.
#[derive(Config, Debug, PartialEq)]
pub struct ModelDescription {
    pub stem: StemConfig,
    pub body: BodyConfig,
    pub head: HeadConfig,
}

impl ModelDescription {
    /// ImageNet layout with a 1000-way linear head.
    pub fn reference(backbone: Backbone, base_width: usize) -> Self {
        let body = BodyConfig::for_backbone(backbone, base_width);
        let head = HeadConfig::linear(body.out_features(), 1000);
        Self::new(StemConfig::imagenet(base_width), body, head)
    }

    /// Copy with the small-input stem and a `hidden`-unit head.
    pub fn adapted(&self, num_classes: usize, hidden: usize, dropout: f64) -> Self {
        Self::new(
            self.stem.for_small_inputs(),
            self.body.clone(),
            HeadConfig::with_hidden(self.body.out_features(), hidden, num_classes, dropout),
        )
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SteeringNet<B> {
        let stem = &self.stem;
        let stem_conv = Conv2dConfig::new([3, stem.channels], [stem.kernel_size, stem.kernel_size])
            .with_stride([stem.stride, stem.stride])
            .with_padding(PaddingConfig2d::Explicit(stem.padding, stem.padding))
            .with_bias(false)
            .init(device);
        let stem_pool = stem.max_pool.then(|| {
            MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init()
        });

        SteeringNet {
            stem_conv,
            stem_pool,
            trunk: Trunk::new(stem.channels, &self.body, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: Head::new(&self.head, device),
            activation: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

/// Two 3x3 convolutions with an identity or projected shortcut.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv = |i, o, s| {
            Conv2dConfig::new([i, o], [3, 3])
                .with_stride([s, s])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device)
        };
        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1: conv(in_channels, out_channels, stride),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv(out_channels, out_channels, 1),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(ds) => ds.norm.forward(ds.conv.forward(input.clone())),
            None => input.clone(),
        };

        let x = self.conv1.forward(input);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        self.activation.forward(x + identity)
    }
}

#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> Stage<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(input, |x, block| block.forward(x))
    }
}

/// The pretrained part of the network.
#[derive(Module, Debug)]
pub struct Trunk<B: Backend> {
    stem_norm: BatchNorm<B, 2>,
    stages: Vec<Stage<B>>,
}

impl<B: Backend> Trunk<B> {
    fn new(stem_channels: usize, body: &BodyConfig, device: &B::Device) -> Self {
        let mut in_channels = stem_channels;
        let mut stages = Vec::with_capacity(4);
        for (i, (&blocks, &width)) in body.blocks_per_stage.iter().zip(&body.widths).enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            let blocks = (0..blocks)
                .map(|b| {
                    let block = BasicBlock::new(in_channels, width, if b == 0 { stride } else { 1 }, device);
                    in_channels = width;
                    block
                })
                .collect();
            stages.push(Stage { blocks });
        }

        Self {
            stem_norm: BatchNormConfig::new(stem_channels).init(device),
            stages,
        }
    }

    pub fn num_blocks(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.blocks.len()).collect()
    }
}

#[derive(Module, Debug)]
pub struct HiddenLayer<B: Backend> {
    fc: Linear<B>,
    norm: BatchNorm<B, 1>,
    activation: Relu,
    dropout: Dropout,
}

#[derive(Module, Debug)]
pub struct Head<B: Backend> {
    hidden: Option<HiddenLayer<B>>,
    output: Linear<B>,
}

impl<B: Backend> Head<B> {
    fn new(config: &HeadConfig, device: &B::Device) -> Self {
        let (hidden, out_in) = match config.hidden {
            Some(units) => (
                Some(HiddenLayer {
                    fc: LinearConfig::new(config.in_features, units).init(device),
                    norm: BatchNormConfig::new(units).init(device),
                    activation: Relu::new(),
                    dropout: DropoutConfig::new(config.dropout).init(),
                }),
                units,
            ),
            None => (None, config.in_features),
        };

        Self {
            hidden,
            output: LinearConfig::new(out_in, config.num_classes).init(device),
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = match &self.hidden {
            Some(layer) => {
                let x = layer.fc.forward(features);
                let [batch, units] = x.dims();
                // Batch norm over [N, C, L] with L = 1.
                let x = layer.norm.forward(x.reshape([batch, units, 1])).reshape([batch, units]);
                let x = layer.activation.forward(x);
                layer.dropout.forward(x)
            }
            None => features,
        };
        self.output.forward(x)
    }
}

/// The steering classifier.
#[derive(Module, Debug)]
pub struct SteeringNet<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_pool: Option<MaxPool2d>,
    trunk: Trunk<B>,
    pool: AdaptiveAvgPool2d,
    head: Head<B>,
    activation: Relu,
}

impl<B: Backend> SteeringNet<B> {
    /// Logits of shape [batch, num_classes].
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem_conv.forward(images);
        let x = self.trunk.stem_norm.forward(x);
        let mut x = self.activation.forward(x);
        if let Some(pool) = &self.stem_pool {
            x = pool.forward(x);
        }

        let x = self.trunk.stages.iter().fold(x, |x, stage| stage.forward(x));
        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        self.head.forward(x.reshape([batch, channels]))
    }

    pub fn trunk(&self) -> &Trunk<B> {
        &self.trunk
    }

    /// Write the trunk weights in the format [`PretrainedSource::Record`] reads.
    pub fn save_trunk(&self, path: &Path) -> steer_core::Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.trunk
            .clone()
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|e| Error::checkpoint(path, format!("{e:?}")))
    }

    fn load_trunk(mut self, path: &Path, device: &B::Device) -> steer_core::Result<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.trunk = self
            .trunk
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| Error::Model(format!("Failed to load pretrained trunk {}: {e:?}", path.display())))?;
        Ok(self)
    }

    fn load_torch_trunk(mut self, path: &Path, device: &B::Device) -> steer_core::Result<Self> {
        if !path.is_file() {
            return Err(Error::Model(format!("Pretrained weights not found: {}", path.display())));
        }
        let args = TORCHVISION_TRUNK_KEYS
            .iter()
            .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
                args.with_key_remap(pattern, replacement)
            });
        let record: TrunkRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(args, device)
            .map_err(|e| Error::Model(format!("Failed to load torch weights {}: {e:?}", path.display())))?;
        self.trunk = self.trunk.load_record(record);
        Ok(self)
    }
}

/// Renames torchvision ResNet state-dict keys onto [`Trunk`] fields, applied in order.
///
/// `conv1.*` and `fc.*` have no counterpart and are left unused.
pub const TORCHVISION_TRUNK_KEYS: &[(&str, &str)] = &[
    (r"^bn1\.", "stem_norm."),
    (r"^layer1\.([0-9]+)\.", "stages.0.blocks.$1."),
    (r"^layer2\.([0-9]+)\.", "stages.1.blocks.$1."),
    (r"^layer3\.([0-9]+)\.", "stages.2.blocks.$1."),
    (r"^layer4\.([0-9]+)\.", "stages.3.blocks.$1."),
    (r"\.downsample\.0\.", ".downsample.conv."),
    (r"\.downsample\.1\.", ".downsample.norm."),
];

/// Where trunk weights come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PretrainedSource {
    /// Random initialisation from the backend seed
    None,
    /// Burn record written by [`SteeringNet::save_trunk`], without extension
    Record(PathBuf),
    /// torchvision ResNet state dict (`.pt` / `.pth`) at `base_width` 64
    Torch(PathBuf),
}

impl PretrainedSource {
    /// Picks the reader from the file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("pt" | "pth") => Self::Torch(path.to_path_buf()),
            _ => Self::Record(path.to_path_buf()),
        }
    }
}

/// Builds [`SteeringNet`]s for a backbone family.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    backbone: Backbone,
    base_width: usize,
    head_hidden: usize,
    pretrained: PretrainedSource,
}

impl ModelBuilder {
    pub fn new(backbone: Backbone, pretrained: PretrainedSource) -> Self {
        Self {
            backbone,
            base_width: 64,
            head_hidden: 32,
            pretrained,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let pretrained = match &config.pretrained_path {
            Some(path) => PretrainedSource::from_path(path),
            None => PretrainedSource::None,
        };
        Self {
            backbone: config.backbone,
            base_width: config.base_width,
            head_hidden: config.head_hidden,
            pretrained,
        }
    }

    pub fn with_base_width(mut self, base_width: usize) -> Self {
        self.base_width = base_width;
        self
    }

    /// The adapted layout, without touching any weights.
    pub fn describe(&self, num_classes: usize, dropout: f64) -> ModelDescription {
        ModelDescription::reference(self.backbone, self.base_width).adapted(
            num_classes,
            self.head_hidden,
            dropout,
        )
    }

    pub fn build<B: Backend>(
        &self,
        num_classes: usize,
        dropout: f64,
        device: &B::Device,
    ) -> steer_core::Result<SteeringNet<B>> {
        if num_classes == 0 {
            return Err(Error::Model("num_classes must be positive".to_string()));
        }
        let description = self.describe(num_classes, dropout);
        let model = description.init::<B>(device);

        let model = match &self.pretrained {
            PretrainedSource::None => model,
            PretrainedSource::Record(path) => {
                info!("Loading pretrained trunk from {}", path.display());
                model.load_trunk(path, device)?
            }
            PretrainedSource::Torch(path) => {
                info!("Loading torchvision weights from {}", path.display());
                model.load_torch_trunk(path, device)?
            }
        };
        info!(
            backbone = ?self.backbone,
            parameters = model.num_params(),
            "Model built"
        );
        Ok(model)
    }
}
