pub mod cnn;
pub mod vgg;

pub use cnn::{Cnn, CnnConfig};
pub use vgg::{Vgg, VggConfig, VggPlan};

use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;

/// Maps a batch of images `[batch, 3, edge, edge]` to class scores `[batch, classes]`.
pub trait ImageClassifier<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Descriptor able to rebuild an untrained model of the same shape.
    fn architecture(&self) -> Architecture;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Architecture {
    Cnn(CnnConfig),
    Vgg(VggConfig),
}

impl Default for Architecture {
    fn default() -> Self {
        Architecture::Cnn(CnnConfig::default())
    }
}

impl Architecture {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Architecture::Cnn(config) => config.validate(),
            Architecture::Vgg(config) => config.validate(),
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            Architecture::Cnn(config) => config.num_classes,
            Architecture::Vgg(config) => config.num_classes,
        }
    }

    pub fn image_size(&self) -> usize {
        match self {
            Architecture::Cnn(config) => config.image_size,
            Architecture::Vgg(config) => config.image_size,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> AnyClassifier<B> {
        match self {
            Architecture::Cnn(config) => AnyClassifier::Cnn(Cnn::new(config.clone(), device)),
            Architecture::Vgg(config) => AnyClassifier::Vgg(Vgg::new(config.clone(), device)),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Cnn(_) => write!(f, "cnn"),
            Architecture::Vgg(config) => {
                let plan = match config.plan {
                    VggPlan::Vgg16 => "vgg16",
                    VggPlan::Compact => "vgg-compact",
                };
                if config.batch_norm {
                    write!(f, "{plan}-bn")
                } else {
                    write!(f, "{plan}")
                }
            }
        }
    }
}

/// A classifier whose concrete type is only known at runtime, e.g. after
/// loading a full model file.
#[derive(Debug)]
pub enum AnyClassifier<B: Backend> {
    Cnn(Cnn<B>),
    Vgg(Vgg<B>),
}

impl<B: Backend> ImageClassifier<B> for AnyClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            AnyClassifier::Cnn(model) => model.forward(images),
            AnyClassifier::Vgg(model) => model.forward(images),
        }
    }

    fn architecture(&self) -> Architecture {
        match self {
            AnyClassifier::Cnn(model) => ImageClassifier::architecture(model),
            AnyClassifier::Vgg(model) => ImageClassifier::architecture(model),
        }
    }
}
