use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    Relu,
};
use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

use super::{Architecture, ImageClassifier};
use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VggPlan {
    /// Thirteen 3x3 convolutions in five pooled stages.
    Vgg16,
    /// Three pooled stages of two convolutions each.
    Compact,
}

impl VggPlan {
    pub fn stages(&self) -> &'static [&'static [usize]] {
        match self {
            VggPlan::Vgg16 => &[
                &[64, 64],
                &[128, 128],
                &[256, 256, 256],
                &[512, 512, 512],
                &[512, 512, 512],
            ],
            VggPlan::Compact => &[&[64, 64], &[128, 128], &[256, 256]],
        }
    }

    pub fn hidden(&self) -> usize {
        match self {
            VggPlan::Vgg16 => 512,
            VggPlan::Compact => 256,
        }
    }

    /// Input edge must be divisible by this.
    pub fn downsample(&self) -> usize {
        1 << self.stages().len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VggConfig {
    pub plan: VggPlan,
    pub num_classes: usize,
    pub image_size: usize,
    pub batch_norm: bool,
    pub dropout: f64,
}

impl Default for VggConfig {
    fn default() -> Self {
        Self {
            plan: VggPlan::Vgg16,
            num_classes: 10,
            image_size: 32,
            batch_norm: false,
            dropout: 0.5,
        }
    }
}

impl VggConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_classes == 0 {
            return Err(ConfigError::NotPositive { field: "num_classes" });
        }
        let step = self.plan.downsample();
        if self.image_size == 0 || self.image_size % step != 0 {
            return Err(ConfigError::Invalid(format!(
                "{:?} needs image_size divisible by {step}, got {}",
                self.plan, self.image_size
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::Invalid(format!(
                "dropout must be within [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    pub fn flattened_features(&self) -> usize {
        let edge = self.image_size / self.plan.downsample();
        let channels = self
            .plan
            .stages()
            .last()
            .and_then(|stage| stage.last())
            .copied()
            .unwrap_or(3);
        channels * edge * edge
    }
}

/// 3x3 same-padding convolution, optional batch norm, ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B>>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(channels_in: usize, channels_out: usize, batch_norm: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([channels_in, channels_out], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let norm = batch_norm.then(|| BatchNormConfig::new(channels_out).init(device));

        Self {
            conv,
            norm,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        self.activation.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct VggStage<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> VggStage<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));
        self.pool.forward(x)
    }
}

/// VGG-style classifier: pooled 3x3 conv stages and a dropout MLP head.
#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    config: Ignored<VggConfig>,
    stages: Vec<VggStage<B>>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    head: Linear<B>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> Vgg<B> {
    pub fn new(config: VggConfig, device: &B::Device) -> Self {
        let mut channels_in = 3;
        let mut stages = Vec::with_capacity(config.plan.stages().len());
        for widths in config.plan.stages() {
            let mut blocks = Vec::with_capacity(widths.len());
            for &channels_out in widths.iter() {
                blocks.push(ConvBlock::new(channels_in, channels_out, config.batch_norm, device));
                channels_in = channels_out;
            }
            stages.push(VggStage {
                blocks,
                pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            });
        }

        let hidden = config.plan.hidden();
        let fc1 = LinearConfig::new(config.flattened_features(), hidden).init(device);
        let fc2 = LinearConfig::new(hidden, hidden).init(device);
        let head = LinearConfig::new(hidden, config.num_classes).init(device);
        let dropout = DropoutConfig::new(config.dropout).init();

        Self {
            config: Ignored(config),
            stages,
            fc1,
            fc2,
            head,
            dropout,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .stages
            .iter()
            .fold(images, |x, stage| stage.forward(x));

        let [batch, channels, height, width] = x.dims();
        let x = x.reshape([batch, channels * height * width]);

        let x = self.dropout.forward(self.activation.forward(self.fc1.forward(x)));
        let x = self.dropout.forward(self.activation.forward(self.fc2.forward(x)));
        self.head.forward(x)
    }
}

impl<B: Backend> ImageClassifier<B> for Vgg<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        Vgg::forward(self, images)
    }

    fn architecture(&self) -> Architecture {
        Architecture::Vgg(self.config.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn vgg16_flattens_to_a_single_position() {
        let config = VggConfig::default();
        config.validate().unwrap();
        assert_eq!(config.flattened_features(), 512);
    }

    #[test]
    fn compact_plan_keeps_a_4x4_map() {
        let config = VggConfig {
            plan: VggPlan::Compact,
            ..VggConfig::default()
        };
        assert_eq!(config.flattened_features(), 256 * 4 * 4);
    }

    #[test]
    fn odd_image_size_is_rejected() {
        let config = VggConfig {
            image_size: 40,
            ..VggConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn architecture_reports_plan_and_batch_norm() {
        let device = Default::default();
        let config = VggConfig {
            plan: VggPlan::Compact,
            image_size: 8,
            batch_norm: true,
            ..VggConfig::default()
        };
        let model = Vgg::<TestBackend>::new(config.clone(), &device);
        assert_eq!(model.architecture(), Architecture::Vgg(config));
        assert_eq!(model.architecture().to_string(), "vgg-compact-bn");
    }

    #[test]
    fn compact_forward_with_batch_norm() {
        let device = Default::default();
        let config = VggConfig {
            plan: VggPlan::Compact,
            image_size: 8,
            batch_norm: true,
            ..VggConfig::default()
        };
        let model = Vgg::<TestBackend>::new(config, &device);
        let images = Tensor::<TestBackend, 4>::ones([2, 3, 8, 8], &device);
        assert_eq!(model.forward(images).dims(), [2, 10]);
    }
}
