use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Record, Recorder, RecorderError};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::config::ConfigError;
use crate::model::{AnyClassifier, Architecture, ImageClassifier};

const FULL_MODEL_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record error: {0:?}")]
    Record(RecorderError),
    #[error("malformed container {path:?}: {source}")]
    Container {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("invalid architecture descriptor: {0}")]
    Architecture(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unsupported full model format version {0}")]
    Version(u32),
}

impl From<RecorderError> for CheckpointError {
    fn from(err: RecorderError) -> Self {
        CheckpointError::Record(err)
    }
}

/// Serializes any burn record to named MessagePack bytes.
pub fn record_to_bytes<B: Backend, R: Record<B>>(record: R) -> Result<Vec<u8>, RecorderError> {
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, record, ())
}

pub fn record_from_bytes<B: Backend, R: Record<B>>(
    bytes: Vec<u8>,
    device: &B::Device,
) -> Result<R, RecorderError> {
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::load(&recorder, bytes, device)
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    fs::write(path, bytes).map_err(|source| CheckpointError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, CheckpointError> {
    fs::read(path).map_err(|source| CheckpointError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_container<T: Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let bytes = bincode::serialize(value).map_err(|source| CheckpointError::Container {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes(path, &bytes)
}

fn read_container<T: DeserializeOwned>(path: &Path) -> Result<T, CheckpointError> {
    let bytes = read_bytes(path)?;
    bincode::deserialize(&bytes).map_err(|source| CheckpointError::Container {
        path: path.to_path_buf(),
        source,
    })
}

/// Training progress snapshot: last completed epoch plus opaque model and
/// optimizer records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub model_state: Vec<u8>,
    pub optimizer_state: Vec<u8>,
}

impl Checkpoint {
    pub fn capture<B, M, O>(epoch: usize, model: &M, optimizer: &O) -> Result<Self, CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        Ok(Self {
            epoch,
            model_state: record_to_bytes::<B, _>(model.clone().into_record())?,
            optimizer_state: record_to_bytes::<B, _>(optimizer.to_record())?,
        })
    }

    pub fn restore_model<B: Backend, M: Module<B>>(
        &self,
        model: M,
        device: &B::Device,
    ) -> Result<M, CheckpointError> {
        let record = record_from_bytes::<B, M::Record>(self.model_state.clone(), device)?;
        Ok(model.load_record(record))
    }

    pub fn restore_optimizer<B, M, O>(&self, optimizer: O, device: &B::Device) -> Result<O, CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let record = record_from_bytes::<B, O::Record>(self.optimizer_state.clone(), device)?;
        Ok(optimizer.load_record(record))
    }
}

/// Writes the checkpoint to `path`, replacing whatever was there.
pub fn save_checkpoint(checkpoint: &Checkpoint, path: &Path) -> Result<(), CheckpointError> {
    write_container(path, checkpoint)?;
    info!("checkpoint saved as: {}", path.display());
    Ok(())
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
    let checkpoint: Checkpoint = read_container(path)?;
    info!("Loaded checkpoint for epoch {} from {:?}", checkpoint.epoch, path);
    Ok(checkpoint)
}

/// Saves parameter values only; loading needs a model of the same shape.
pub fn save_parameter_state<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<(), CheckpointError> {
    let bytes = record_to_bytes::<B, _>(model.clone().into_record())?;
    write_bytes(path, &bytes)?;
    info!("model saved as: {}", path.display());
    Ok(())
}

pub fn load_parameter_state<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, CheckpointError> {
    let bytes = read_bytes(path)?;
    let record = record_from_bytes::<B, M::Record>(bytes, device)?;
    Ok(model.load_record(record))
}

#[derive(Debug, Serialize, Deserialize)]
struct FullModelFile {
    version: u32,
    /// JSON-encoded [`Architecture`].
    architecture: String,
    state: Vec<u8>,
}

/// Saves the architecture descriptor together with the parameters, so the
/// model can be rebuilt by [`load_full_model`] without naming its type.
pub fn save_full_model<B, M>(model: &M, path: &Path) -> Result<(), CheckpointError>
where
    B: Backend,
    M: ImageClassifier<B> + Module<B>,
{
    let file = FullModelFile {
        version: FULL_MODEL_VERSION,
        architecture: serde_json::to_string(&model.architecture())?,
        state: record_to_bytes::<B, _>(model.clone().into_record())?,
    };
    write_container(path, &file)?;
    info!("model saved as: {}", path.display());
    Ok(())
}

pub fn load_full_model<B: Backend>(path: &Path, device: &B::Device) -> Result<AnyClassifier<B>, CheckpointError> {
    let file: FullModelFile = read_container(path)?;
    if file.version != FULL_MODEL_VERSION {
        return Err(CheckpointError::Version(file.version));
    }

    let architecture: Architecture = serde_json::from_str(&file.architecture)?;
    architecture.validate()?;
    info!("Rebuilding {} from {:?}", architecture, path);

    let model = match architecture.init::<B>(device) {
        AnyClassifier::Cnn(model) => {
            AnyClassifier::Cnn(model.load_record(record_from_bytes::<B, _>(file.state, device)?))
        }
        AnyClassifier::Vgg(model) => {
            AnyClassifier::Vgg(model.load_record(record_from_bytes::<B, _>(file.state, device)?))
        }
    };
    Ok(model)
}
