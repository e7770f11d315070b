// Library exports for use by the binary and integration tests

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod model;
pub mod training;

// Re-export commonly used types
pub use config::{TrainConfig, TrainingConfig};
pub use model::{AnyClassifier, Architecture, Cnn, ImageClassifier, Vgg};
pub use training::{AccuracyMetric, ClassifierTrainer, LogObserver};
