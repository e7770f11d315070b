use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

use super::{Architecture, ImageClassifier};
use crate::config::ConfigError;

const KERNEL: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CnnConfig {
    pub num_classes: usize,
    pub image_size: usize,
    pub conv_channels: [usize; 2],
    pub hidden: [usize; 2],
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            num_classes: 10,
            image_size: 32,
            conv_channels: [6, 16],
            hidden: [120, 84],
        }
    }
}

impl CnnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_classes == 0 {
            return Err(ConfigError::NotPositive { field: "num_classes" });
        }
        if self.conv_channels.contains(&0) || self.hidden.contains(&0) {
            return Err(ConfigError::Invalid("cnn layer widths must be > 0".into()));
        }
        if self.image_size < 16 {
            return Err(ConfigError::Invalid(format!(
                "cnn needs image_size >= 16, got {}",
                self.image_size
            )));
        }
        Ok(())
    }

    /// Spatial edge after two (conv 5x5, pool 2x2) stages.
    pub fn feature_edge(&self) -> usize {
        let first = (self.image_size - (KERNEL - 1)) / 2;
        (first - (KERNEL - 1)) / 2
    }

    pub fn flattened_features(&self) -> usize {
        let edge = self.feature_edge();
        self.conv_channels[1] * edge * edge
    }
}

/// Two conv/pool stages followed by three fully connected layers.
#[derive(Module, Debug)]
pub struct Cnn<B: Backend> {
    config: Ignored<CnnConfig>,
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Cnn<B> {
    pub fn new(config: CnnConfig, device: &B::Device) -> Self {
        let [c1, c2] = config.conv_channels;
        let [h1, h2] = config.hidden;

        let conv1 = Conv2dConfig::new([3, c1], [KERNEL, KERNEL]).init(device);
        let conv2 = Conv2dConfig::new([c1, c2], [KERNEL, KERNEL]).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let fc1 = LinearConfig::new(config.flattened_features(), h1).init(device);
        let fc2 = LinearConfig::new(h1, h2).init(device);
        let fc3 = LinearConfig::new(h2, config.num_classes).init(device);

        Self {
            config: Ignored(config),
            conv1,
            conv2,
            pool,
            fc1,
            fc2,
            fc3,
            activation: Relu::new(),
        }
    }

    /// `[batch, 3, edge, edge]` -> `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(self.activation.forward(self.conv1.forward(images)));
        let x = self.pool.forward(self.activation.forward(self.conv2.forward(x)));

        let [batch, channels, height, width] = x.dims();
        let x = x.reshape([batch, channels * height * width]);

        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.activation.forward(self.fc2.forward(x));
        self.fc3.forward(x)
    }
}

impl<B: Backend> ImageClassifier<B> for Cnn<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        Cnn::forward(self, images)
    }

    fn architecture(&self) -> Architecture {
        Architecture::Cnn(self.config.0.clone())
    }
}
