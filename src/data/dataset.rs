use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{path:?} is {len} bytes, not a whole number of {record}-byte records")]
    Truncated {
        path: PathBuf,
        len: usize,
        record: usize,
    },
    #[error("label {label} is outside [0, {num_classes})")]
    LabelOutOfRange { label: usize, num_classes: usize },
    #[error("image has {actual} pixel values, expected {expected}")]
    PixelCount { expected: usize, actual: usize },
    #[error("no class directories found under {0:?}")]
    NoClasses(PathBuf),
    #[error("tensor conversion failed: {0}")]
    Tensor(String),
}

/// Per-channel `(x / 255 - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalize {
    fn default() -> Self {
        Self {
            mean: [0.5; 3],
            std: [0.5; 3],
        }
    }
}

impl Normalize {
    pub fn new(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { mean, std }
    }

    /// `pixels` are channel-major (`[3, edge, edge]`).
    pub fn apply(&self, pixels: &[u8], out: &mut Vec<f32>) {
        let plane = pixels.len() / 3;
        out.extend(pixels.iter().enumerate().map(|(i, &p)| {
            let channel = (i / plane.max(1)).min(2);
            (f32::from(p) / 255.0 - self.mean[channel]) / self.std[channel]
        }));
    }
}

/// One stored example: raw channel-major RGB bytes plus its class label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    pub pixels: Vec<u8>,
    pub label: u8,
}

/// Indexable collection of `(image, label)` pairs with a fixed edge size.
pub trait ImageDataset {
    fn get(&self, index: usize) -> Option<&ImageItem>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn image_size(&self) -> usize;

    fn normalize(&self) -> &Normalize;
}

#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    items: Vec<ImageItem>,
    image_size: usize,
    normalize: Normalize,
}

impl InMemoryDataset {
    /// Checks every item's pixel count and label before accepting it.
    pub fn new(
        items: Vec<ImageItem>,
        image_size: usize,
        num_classes: usize,
        normalize: Normalize,
    ) -> Result<Self, DataError> {
        let expected = 3 * image_size * image_size;
        for item in &items {
            if item.pixels.len() != expected {
                return Err(DataError::PixelCount {
                    expected,
                    actual: item.pixels.len(),
                });
            }
            if usize::from(item.label) >= num_classes {
                return Err(DataError::LabelOutOfRange {
                    label: usize::from(item.label),
                    num_classes,
                });
            }
        }

        Ok(Self {
            items,
            image_size,
            normalize,
        })
    }
}

impl ImageDataset for InMemoryDataset {
    fn get(&self, index: usize) -> Option<&ImageItem> {
        self.items.get(index)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn image_size(&self) -> usize {
        self.image_size
    }

    fn normalize(&self) -> &Normalize {
        &self.normalize
    }
}
