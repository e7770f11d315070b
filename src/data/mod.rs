pub mod cifar10;
mod dataset;
pub mod image_folder;
mod loader;

pub use cifar10::Split;
pub use dataset::{DataError, ImageDataset, ImageItem, InMemoryDataset, Normalize};
pub use loader::{BatchLoader, DataLoader, ImageBatch};

use tracing::info;

use crate::config::{DataConfig, DatasetFormat};

/// Loads and validates one split described by `config`.
pub fn load_dataset(config: &DataConfig, split: Split) -> Result<InMemoryDataset, DataError> {
    let normalize = Normalize::new(config.mean, config.std);
    let items = match (config.format, split) {
        (DatasetFormat::Cifar10Bin, Split::Train) => cifar10::load_split(&config.train_dir, split)?,
        (DatasetFormat::Cifar10Bin, Split::Test) => cifar10::load_split(&config.test_dir, split)?,
        (DatasetFormat::ImageFolder, Split::Train) => {
            image_folder::load_folder(&config.train_dir, config.image_size, config.num_classes)?
        }
        (DatasetFormat::ImageFolder, Split::Test) => {
            image_folder::load_folder(&config.test_dir, config.image_size, config.num_classes)?
        }
    };

    let dataset = InMemoryDataset::new(items, config.image_size, config.num_classes, normalize)?;
    info!("{:?} split: {} examples", split, dataset.len());
    Ok(dataset)
}
