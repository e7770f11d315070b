use burn::tensor::{Int, Tensor, backend::Backend};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::dataset::{DataError, ImageDataset};

/// Images `[n, 3, edge, edge]` and their labels `[n]`.
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn new(images: Tensor<B, 4>, labels: Tensor<B, 1, Int>) -> Self {
        Self { images, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait for batched iteration over a dataset
pub trait DataLoader<B: Backend> {
    /// Get the next batch of data, `None` once the pass is exhausted
    fn next_batch(&mut self) -> Result<Option<ImageBatch<B>>, DataError>;

    /// Start a new pass (reshuffling if enabled)
    fn reset(&mut self);

    /// Number of batches in one pass, counting a trailing partial batch
    fn num_batches(&self) -> usize;
}

pub struct BatchLoader<B: Backend, D: ImageDataset> {
    dataset: D,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: Option<StdRng>,
    device: B::Device,
}

impl<B: Backend, D: ImageDataset> BatchLoader<B, D> {
    /// Visits the dataset in index order.
    pub fn sequential(dataset: D, batch_size: usize, device: B::Device) -> Self {
        Self::build(dataset, batch_size, None, device)
    }

    /// Visits the dataset in a fresh seeded permutation every pass.
    pub fn shuffled(dataset: D, batch_size: usize, seed: u64, device: B::Device) -> Self {
        let mut loader = Self::build(dataset, batch_size, Some(StdRng::seed_from_u64(seed)), device);
        loader.reset();
        loader
    }

    fn build(dataset: D, batch_size: usize, rng: Option<StdRng>, device: B::Device) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        let order = (0..dataset.len()).collect();
        Self {
            dataset,
            batch_size,
            order,
            cursor: 0,
            rng,
            device,
        }
    }
}

impl<B: Backend, D: ImageDataset> DataLoader<B> for BatchLoader<B, D> {
    fn next_batch(&mut self) -> Result<Option<ImageBatch<B>>, DataError> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let edge = self.dataset.image_size();
        let normalize = *self.dataset.normalize();
        let mut pixels = Vec::with_capacity(indices.len() * 3 * edge * edge);
        let mut labels = Vec::with_capacity(indices.len());

        for &index in indices {
            let item = self.dataset.get(index).ok_or_else(|| {
                DataError::Tensor(format!("dataset index {index} out of bounds"))
            })?;
            normalize.apply(&item.pixels, &mut pixels);
            // Stored as u8; the loss expects the backend's wide integer type.
            labels.push(i64::from(item.label));
        }

        let count = labels.len();
        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([count, 3, edge, edge]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        Ok(Some(ImageBatch::new(images, labels)))
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
    }

    fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ImageItem, InMemoryDataset, Normalize};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn dataset(len: usize) -> InMemoryDataset {
        let items = (0..len)
            .map(|i| ImageItem {
                pixels: vec![(i % 256) as u8; 3 * 2 * 2],
                label: (i % 10) as u8,
            })
            .collect();
        InMemoryDataset::new(items, 2, 10, Normalize::default()).unwrap()
    }

    fn drain_labels(loader: &mut impl DataLoader<TestBackend>) -> Vec<i64> {
        let mut labels = Vec::new();
        while let Some(batch) = loader.next_batch().unwrap() {
            assert_eq!(batch.images.dims()[0], batch.len());
            labels.extend(batch.labels.into_data().to_vec::<i64>().unwrap());
        }
        labels
    }

    #[test]
    fn keeps_trailing_partial_batch() {
        let mut loader = BatchLoader::<TestBackend, _>::sequential(dataset(7), 3, Default::default());
        assert_eq!(loader.num_batches(), 3);

        let sizes: Vec<usize> = std::iter::from_fn(|| loader.next_batch().unwrap())
            .map(|batch| batch.len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn five_hundred_examples_make_five_batches_of_one_hundred() {
        let loader = BatchLoader::<TestBackend, _>::shuffled(dataset(500), 100, 7, Default::default());
        assert_eq!(loader.num_batches(), 5);
    }

    #[test]
    fn sequential_order_is_stable() {
        let mut loader = BatchLoader::<TestBackend, _>::sequential(dataset(12), 5, Default::default());
        let first = drain_labels(&mut loader);
        loader.reset();
        let second = drain_labels(&mut loader);
        assert_eq!(first, (0..12).map(|i| i % 10).collect::<Vec<i64>>());
        assert_eq!(first, second);
    }

    #[test]
    fn shuffled_pass_is_a_permutation() {
        let mut loader = BatchLoader::<TestBackend, _>::shuffled(dataset(50), 8, 1, Default::default());
        let mut labels = drain_labels(&mut loader);
        labels.sort_unstable();

        let mut expected: Vec<i64> = (0..50).map(|i| i % 10).collect();
        expected.sort_unstable();
        assert_eq!(labels, expected);
    }

    #[test]
    fn images_are_normalized() {
        let mut loader = BatchLoader::<TestBackend, _>::sequential(dataset(1), 1, Default::default());
        let batch = loader.next_batch().unwrap().unwrap();
        assert_eq!(batch.images.dims(), [1, 3, 2, 2]);
        let values = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|&v| (v + 1.0).abs() < 1e-6));
    }

    #[test]
    fn empty_dataset_yields_nothing() {
        let mut loader = BatchLoader::<TestBackend, _>::shuffled(dataset(0), 4, 0, Default::default());
        assert_eq!(loader.num_batches(), 0);
        assert!(loader.next_batch().unwrap().is_none());
    }
}
