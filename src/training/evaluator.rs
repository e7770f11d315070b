use burn::tensor::{Int, Tensor, backend::Backend};
use std::fmt;
use tracing::debug;

use crate::data::{DataError, DataLoader};
use crate::model::ImageClassifier;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccuracyMetric {
    pub n_correct: usize,
    pub n_samples: usize,
}

impl AccuracyMetric {
    pub fn new(n_correct: usize, n_samples: usize) -> Self {
        assert!(n_correct <= n_samples, "n_correct must not exceed n_samples");
        Self {
            n_correct,
            n_samples,
        }
    }

    /// Counts one batch. Only positions present in both slices are compared.
    pub fn record(&mut self, predicted: &[usize], actual: &[usize]) {
        self.n_samples += actual.len();
        self.n_correct += predicted
            .iter()
            .zip(actual)
            .filter(|(p, a)| p == a)
            .count();
    }

    /// `None` for an empty pass.
    pub fn accuracy(&self) -> Option<f64> {
        (self.n_samples > 0).then(|| self.n_correct as f64 / self.n_samples as f64)
    }
}

impl fmt::Display for AccuracyMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.accuracy() {
            Some(accuracy) => write!(f, "{accuracy:.3}"),
            None => write!(f, "n/a"),
        }
    }
}

/// Index of the largest score in each row; ties go to the lowest index.
pub fn argmax_rows(scores: &[f32], num_classes: usize) -> Vec<usize> {
    if num_classes == 0 {
        return Vec::new();
    }
    scores
        .chunks(num_classes)
        .map(|row| {
            let mut best = 0;
            for (index, &score) in row.iter().enumerate().skip(1) {
                if score > row[best] {
                    best = index;
                }
            }
            best
        })
        .collect()
}

fn predict<B: Backend, M: ImageClassifier<B>>(model: &M, images: Tensor<B, 4>) -> Result<Vec<usize>, DataError> {
    let scores = model.forward(images);
    let [_, num_classes] = scores.dims();
    let values = scores
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| DataError::Tensor(format!("{err:?}")))?;
    Ok(argmax_rows(&values, num_classes))
}

fn labels_to_vec<B: Backend>(labels: Tensor<B, 1, Int>) -> Result<Vec<usize>, DataError> {
    labels
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| DataError::Tensor(format!("{err:?}")))?
        .into_iter()
        .map(|label| {
            usize::try_from(label).map_err(|_| DataError::Tensor(format!("negative label {label}")))
        })
        .collect()
}

/// One sequential pass over `loader`. Expects an inference model (for
/// autodiff models pass `model.valid()`), so no gradients are tracked.
pub fn evaluate<B, M, L>(model: &M, loader: &mut L) -> Result<AccuracyMetric, DataError>
where
    B: Backend,
    M: ImageClassifier<B>,
    L: DataLoader<B>,
{
    loader.reset();
    let mut metric = AccuracyMetric::default();

    while let Some(batch) = loader.next_batch()? {
        let predicted = predict(model, batch.images)?;
        let actual = labels_to_vec(batch.labels)?;
        metric.record(&predicted, &actual);
    }

    debug!("evaluated {} samples, {} correct", metric.n_samples, metric.n_correct);
    Ok(metric)
}

/// Predicted and true labels for a single batch, for eyeballing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PredictionPreview {
    pub predicted: Vec<usize>,
    pub actual: Vec<usize>,
}

fn write_labels(f: &mut fmt::Formatter<'_>, labels: &[usize]) -> fmt::Result {
    write!(f, "[")?;
    for (i, label) in labels.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{label}")?;
    }
    write!(f, "]")
}

impl fmt::Display for PredictionPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "predicted labels:")?;
        write_labels(f, &self.predicted)?;
        writeln!(f)?;
        writeln!(f, "actual labels:")?;
        write_labels(f, &self.actual)
    }
}

/// Runs the model on the first batch of a fresh pass. `None` if the loader is empty.
pub fn preview_predictions<B, M, L>(model: &M, loader: &mut L) -> Result<Option<PredictionPreview>, DataError>
where
    B: Backend,
    M: ImageClassifier<B>,
    L: DataLoader<B>,
{
    loader.reset();
    let Some(batch) = loader.next_batch()? else {
        return Ok(None);
    };

    Ok(Some(PredictionPreview {
        predicted: predict(model, batch.images)?,
        actual: labels_to_vec(batch.labels)?,
    }))
}
