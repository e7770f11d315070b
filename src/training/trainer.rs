use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLoss;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{ElementConversion, Tensor, backend::{AutodiffBackend, Backend}};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointError, save_checkpoint};
use crate::config::TrainingConfig;
use crate::data::{DataLoader, ImageBatch};
use crate::model::ImageClassifier;

#[derive(Clone, Debug)]
pub struct TrainOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub batch_size: usize,
}

impl<B: Backend> TrainOutput<B> {
    pub fn new(loss: Tensor<B, 1>, batch_size: usize) -> Self {
        Self { loss, batch_size }
    }

    pub fn loss_value(&self) -> f32 {
        self.loss.clone().into_scalar().elem::<f32>()
    }
}

/// Emitted every `log_every` steps. `epoch` is zero-based, `step` one-based.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    pub epoch: usize,
    pub num_epochs: usize,
    pub step: usize,
    pub total_steps: usize,
    pub loss: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub steps: usize,
    pub mean_loss: Option<f64>,
}

/// Side-effect hooks for the training loop; none of them affect training.
pub trait TrainingObserver {
    fn on_progress(&mut self, progress: &Progress);

    fn on_epoch_end(&mut self, _summary: &EpochSummary) {}

    fn on_checkpoint(&mut self, _epoch: usize, _path: &Path) {}
}

/// Writes progress lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl TrainingObserver for LogObserver {
    fn on_progress(&mut self, progress: &Progress) {
        info!(
            "epoch: {}/{}, step: {}/{}, loss: {:.3}",
            progress.epoch + 1,
            progress.num_epochs,
            progress.step,
            progress.total_steps,
            progress.loss
        );
    }

    fn on_epoch_end(&mut self, summary: &EpochSummary) {
        match summary.mean_loss {
            Some(mean) => debug!(
                "epoch {} done: {} steps, mean loss {:.4}",
                summary.epoch + 1,
                summary.steps,
                mean
            ),
            None => warn!("epoch {} ran zero steps", summary.epoch + 1),
        }
    }
}

pub struct ClassifierTrainer<B, M>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
{
    model: M,
    optimizer: OptimizerAdaptor<Adam, M, B>,
    loss_fn: CrossEntropyLoss<B>,
    config: TrainingConfig,
    start_epoch: usize,
}

impl<B, M> ClassifierTrainer<B, M>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
{
    pub fn new(model: M, config: TrainingConfig, device: &B::Device) -> Self {
        let optimizer = AdamConfig::new().init::<B, M>();
        let loss_fn = CrossEntropyLoss::new(None, device);

        Self {
            model,
            optimizer,
            loss_fn,
            config,
            start_epoch: 0,
        }
    }

    /// Restores model and optimizer state and continues after the
    /// checkpoint's epoch.
    pub fn resume(
        model: M,
        config: TrainingConfig,
        checkpoint: &Checkpoint,
        device: &B::Device,
    ) -> Result<Self, CheckpointError> {
        let model = checkpoint.restore_model::<B, M>(model, device)?;
        let optimizer = checkpoint
            .restore_optimizer::<B, M, _>(AdamConfig::new().init::<B, M>(), device)?;
        info!("Resuming after epoch {}", checkpoint.epoch + 1);

        Ok(Self {
            model,
            optimizer,
            loss_fn: CrossEntropyLoss::new(None, device),
            config,
            start_epoch: checkpoint.epoch + 1,
        })
    }

    /// Forward, loss, backward, one optimizer update. The gradients are
    /// consumed by the update, so nothing accumulates into the next step.
    pub fn train_step(&mut self, batch: ImageBatch<B>) -> TrainOutput<B> {
        let batch_size = batch.len();

        let scores = self.model.forward(batch.images);
        let loss = self.loss_fn.forward(scores, batch.labels);

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .optimizer
            .step(self.config.learning_rate, self.model.clone(), grads);

        TrainOutput::new(loss, batch_size)
    }

    /// Runs the remaining epochs, writing `checkpoint_path` after each one.
    pub fn run<L: DataLoader<B>>(
        mut self,
        loader: &mut L,
        checkpoint_path: &Path,
        observer: &mut dyn TrainingObserver,
    ) -> Result<M> {
        let num_epochs = self.config.num_epochs;
        let total_steps = loader.num_batches();
        if total_steps == 0 {
            warn!("Training collection is empty; epochs will checkpoint an untrained model");
        }

        for epoch in self.start_epoch..num_epochs {
            loader.reset();
            let mut step = 0;
            let mut loss_sum = 0.0f64;

            loop {
                let Some(batch) = loader
                    .next_batch()
                    .with_context(|| format!("Failed to load batch {} of epoch {}", step + 1, epoch + 1))?
                else {
                    break;
                };
                step += 1;
                let loss = self.train_step(batch).loss_value();
                loss_sum += f64::from(loss);

                if step % self.config.log_every == 0 {
                    observer.on_progress(&Progress {
                        epoch,
                        num_epochs,
                        step,
                        total_steps,
                        loss,
                    });
                }
            }

            observer.on_epoch_end(&EpochSummary {
                epoch,
                steps: step,
                mean_loss: (step > 0).then(|| loss_sum / step as f64),
            });

            let checkpoint = Checkpoint::capture::<B, M, _>(epoch, &self.model, &self.optimizer)
                .with_context(|| format!("Failed to capture checkpoint for epoch {}", epoch + 1))?;
            save_checkpoint(&checkpoint, checkpoint_path)
                .with_context(|| format!("Failed to write checkpoint {:?}", checkpoint_path))?;
            observer.on_checkpoint(epoch, checkpoint_path);
        }

        Ok(self.model)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::load_checkpoint;
    use crate::data::{BatchLoader, ImageItem, InMemoryDataset, Normalize};
    use crate::model::{Cnn, CnnConfig};
    use burn::backend::Autodiff;
    use burn::tensor::{Distribution, Int};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    const EDGE: usize = 16;

    #[derive(Default)]
    struct RecordingObserver {
        progress: Vec<Progress>,
        epochs: Vec<EpochSummary>,
        checkpoints: Vec<usize>,
    }

    impl TrainingObserver for RecordingObserver {
        fn on_progress(&mut self, progress: &Progress) {
            self.progress.push(*progress);
        }

        fn on_epoch_end(&mut self, summary: &EpochSummary) {
            self.epochs.push(*summary);
        }

        fn on_checkpoint(&mut self, epoch: usize, _path: &Path) {
            self.checkpoints.push(epoch);
        }
    }

    fn cnn_config() -> CnnConfig {
        CnnConfig {
            num_classes: 3,
            image_size: EDGE,
            conv_channels: [2, 4],
            hidden: [8, 8],
        }
    }

    fn dataset(len: usize) -> InMemoryDataset {
        let items = (0..len)
            .map(|i| ImageItem {
                pixels: (0..3 * EDGE * EDGE).map(|p| ((p * 7 + i * 13) % 256) as u8).collect(),
                label: (i % 3) as u8,
            })
            .collect();
        InMemoryDataset::new(items, EDGE, 3, Normalize::default()).unwrap()
    }

    fn training_config(num_epochs: usize, batch_size: usize, log_every: usize) -> TrainingConfig {
        TrainingConfig {
            num_epochs,
            batch_size,
            log_every,
            learning_rate: 1e-2,
            ..TrainingConfig::default()
        }
    }

    fn trainer(config: TrainingConfig) -> ClassifierTrainer<TestAutodiffBackend, Cnn<TestAutodiffBackend>> {
        let device = Default::default();
        let model = Cnn::<TestAutodiffBackend>::new(cnn_config(), &device);
        ClassifierTrainer::new(model, config, &device)
    }

    fn loader(len: usize, batch_size: usize) -> BatchLoader<TestAutodiffBackend, InMemoryDataset> {
        BatchLoader::shuffled(dataset(len), batch_size, 3, Default::default())
    }

    #[test]
    fn one_step_changes_parameters() {
        let device = Default::default();
        let mut trainer = trainer(training_config(1, 4, 100));
        let probe = Tensor::<TestBackend, 4>::random([2, 3, EDGE, EDGE], Distribution::Default, &device);
        let before = trainer.model().valid().forward(probe.clone()).into_data().to_vec::<f32>().unwrap();

        let images = Tensor::<TestAutodiffBackend, 4>::random([4, 3, EDGE, EDGE], Distribution::Default, &device);
        let labels = Tensor::<TestAutodiffBackend, 1, Int>::from_ints([0, 1, 2, 1], &device);
        let output = trainer.train_step(ImageBatch::new(images, labels));
        assert_eq!(output.batch_size, 4);
        assert!(output.loss_value() > 0.0);

        let after = trainer.model().valid().forward(probe).into_data().to_vec::<f32>().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn small_epoch_never_reaches_progress_interval() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Checkpoint.pth");
        let mut loader = loader(500, 100);
        let mut observer = RecordingObserver::default();

        trainer(training_config(1, 100, 100))
            .run(&mut loader, &path, &mut observer)
            .unwrap();

        assert_eq!(observer.epochs.len(), 1);
        assert_eq!(observer.epochs[0].steps, 5);
        assert!(observer.progress.is_empty());
    }

    #[test]
    fn progress_fires_on_multiples_of_log_every() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Checkpoint.pth");
        let mut loader = loader(10, 2);
        let mut observer = RecordingObserver::default();

        trainer(training_config(1, 2, 2))
            .run(&mut loader, &path, &mut observer)
            .unwrap();

        let steps: Vec<usize> = observer.progress.iter().map(|p| p.step).collect();
        assert_eq!(steps, vec![2, 4]);
        assert!(observer.progress.iter().all(|p| p.total_steps == 5 && p.num_epochs == 1));
    }

    #[test]
    fn each_epoch_overwrites_the_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Checkpoint.pth");
        let mut loader = loader(6, 3);
        let mut observer = RecordingObserver::default();

        trainer(training_config(2, 3, 100))
            .run(&mut loader, &path, &mut observer)
            .unwrap();

        assert_eq!(observer.checkpoints, vec![0, 1]);
        assert_eq!(load_checkpoint(&path).unwrap().epoch, 1);
    }

    #[test]
    fn empty_collection_still_checkpoints() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Checkpoint.pth");
        let mut loader = loader(0, 4);
        let mut observer = RecordingObserver::default();

        trainer(training_config(1, 4, 100))
            .run(&mut loader, &path, &mut observer)
            .unwrap();

        assert_eq!(observer.epochs[0].steps, 0);
        assert_eq!(observer.epochs[0].mean_loss, None);
        assert_eq!(load_checkpoint(&path).unwrap().epoch, 0);
    }

    #[test]
    fn resume_continues_after_checkpointed_epoch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Checkpoint.pth");
        let device = Default::default();
        let mut loader = loader(6, 3);

        trainer(training_config(1, 3, 100))
            .run(&mut loader, &path, &mut RecordingObserver::default())
            .unwrap();

        let checkpoint = load_checkpoint(&path).unwrap();
        let model = Cnn::<TestAutodiffBackend>::new(cnn_config(), &device);
        let resumed = ClassifierTrainer::resume(model, training_config(3, 3, 100), &checkpoint, &device).unwrap();
        assert_eq!(resumed.start_epoch(), 1);
        // Adam moments come back from the checkpoint; a fresh optimizer has none
        assert!(trainer(training_config(1, 3, 100)).optimizer.to_record().is_empty());
        assert!(!resumed.optimizer.to_record().is_empty());

        let mut observer = RecordingObserver::default();
        resumed.run(&mut loader, &path, &mut observer).unwrap();
        assert_eq!(observer.checkpoints, vec![1, 2]);
        assert_eq!(load_checkpoint(&path).unwrap().epoch, 2);
    }

    #[test]
    fn checkpoint_failure_stops_training() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing/Checkpoint.pth");
        let mut loader = loader(3, 3);
        let mut observer = RecordingObserver::default();

        let result = trainer(training_config(2, 3, 100)).run(&mut loader, &path, &mut observer);
        assert!(result.is_err());
        assert!(observer.checkpoints.is_empty());
        assert_eq!(observer.epochs.len(), 1);
    }
}
