mod evaluator;
mod trainer;

pub use evaluator::{AccuracyMetric, PredictionPreview, argmax_rows, evaluate, preview_predictions};
pub use trainer::{
    ClassifierTrainer, EpochSummary, LogObserver, Progress, TrainOutput, TrainingObserver,
};
