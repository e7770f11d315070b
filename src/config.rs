use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::model::Architecture;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be > 0")]
    NotPositive { field: &'static str },
    #[error("std[{channel}] must be non-zero")]
    ZeroStd { channel: usize },
    #[error("model expects {model} classes but data declares {data}")]
    ClassMismatch { model: usize, data: usize },
    #[error("model expects {model}px images but data is resized to {data}px")]
    ImageSizeMismatch { model: usize, data: usize },
    #[error("{0}")]
    Invalid(String),
}

fn ensure_positive(value: usize, field: &'static str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive { field });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetFormat {
    /// CIFAR-10 binary batches (`data_batch_*.bin`, `test_batch.bin`).
    Cifar10Bin,
    /// One sub-directory per class, holding image files.
    ImageFolder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub format: DatasetFormat,
    pub train_dir: PathBuf,
    pub test_dir: PathBuf,
    pub image_size: usize,
    pub num_classes: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            format: DatasetFormat::Cifar10Bin,
            train_dir: PathBuf::from("data/cifar-10-batches-bin"),
            test_dir: PathBuf::from("data/cifar-10-batches-bin"),
            image_size: 32,
            num_classes: 10,
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive(self.image_size, "image_size")?;
        ensure_positive(self.num_classes, "num_classes")?;
        if self.num_classes > usize::from(u8::MAX) + 1 {
            return Err(ConfigError::Invalid(format!(
                "num_classes must be <= 256, got {}",
                self.num_classes
            )));
        }
        if let Some(channel) = self.std.iter().position(|s| *s == 0.0) {
            return Err(ConfigError::ZeroStd { channel });
        }
        if self.format == DatasetFormat::Cifar10Bin && self.image_size != 32 {
            return Err(ConfigError::Invalid(format!(
                "cifar10-bin images are 32px, got image_size {}",
                self.image_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub learning_rate: f64,
    pub log_every: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_epochs: 1,
            batch_size: 100,
            eval_batch_size: 16,
            learning_rate: 1e-3,
            log_every: 100,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive(self.num_epochs, "num_epochs")?;
        ensure_positive(self.batch_size, "batch_size")?;
        ensure_positive(self.eval_batch_size, "eval_batch_size")?;
        ensure_positive(self.log_every, "log_every")?;
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub checkpoint_path: PathBuf,
    pub model_state_path: PathBuf,
    pub model_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("Checkpoint.pth"),
            model_state_path: PathBuf::from("CNN_state_dict.pth"),
            model_path: PathBuf::from("CNN.pth"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub model: Architecture,
    pub training: TrainingConfig,
    pub data: DataConfig,
    pub output: OutputConfig,
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;
        self.training.validate()?;
        self.data.validate()?;

        let model_classes = self.model.num_classes();
        if model_classes != self.data.num_classes {
            return Err(ConfigError::ClassMismatch {
                model: model_classes,
                data: self.data.num_classes,
            });
        }
        let model_size = self.model.image_size();
        if model_size != self.data.image_size {
            return Err(ConfigError::ImageSizeMismatch {
                model: model_size,
                data: self.data.image_size,
            });
        }
        Ok(())
    }
}

impl fmt::Display for TrainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model={}, epochs={}, batch_size={}, lr={}, image_size={}, classes={}",
            self.model,
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.data.image_size,
            self.data.num_classes,
        )
    }
}
