use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cnn_trainer::checkpoint::{
    load_checkpoint, load_full_model, save_full_model, save_parameter_state,
};
use cnn_trainer::config::TrainConfig;
use cnn_trainer::data::{BatchLoader, InMemoryDataset, Split, load_dataset};
use cnn_trainer::model::{Architecture, Cnn, ImageClassifier, Vgg};
use cnn_trainer::training::{ClassifierTrainer, LogObserver, evaluate, preview_predictions};

#[cfg(not(any(feature = "wgpu-backend", feature = "tch-backend")))]
type InnerBackend = burn_ndarray::NdArray<f32>;
#[cfg(feature = "wgpu-backend")]
type InnerBackend = burn_wgpu::Wgpu;
#[cfg(all(feature = "tch-backend", not(feature = "wgpu-backend")))]
type InnerBackend = burn_tch::LibTorch<f32>;

type Backend = Autodiff<InnerBackend>;
type Device = <InnerBackend as burn::tensor::backend::Backend>::Device;

#[derive(Debug, Parser)]
#[command(author, version, about = "CNN image classifier training CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Train, evaluate, and save the model
    Train(TrainArgs),
    /// Evaluate a saved full model on the test split
    Eval(EvalArgs),
}

#[derive(Debug, Args)]
struct TrainArgs {
    /// Path to configuration JSON file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Continue from the checkpoint file if it exists
    #[arg(long)]
    resume: bool,
}

#[derive(Debug, Args)]
struct EvalArgs {
    /// Path to a full model file written by `train`
    #[arg(long)]
    model: PathBuf,
    /// Path to configuration JSON file (for the data section)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => train_command(args),
        Commands::Eval(args) => eval_command(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<TrainConfig> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            let config_str = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            serde_json::from_str(&config_str).with_context(|| "Failed to parse config JSON")?
        }
        None => {
            info!("No config file given, using defaults");
            TrainConfig::default()
        }
    };

    config.validate().context("Invalid configuration")?;
    info!("Configuration: {}", config);
    Ok(config)
}

fn train_command(args: TrainArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    // Chosen once and threaded through every tensor call
    let device = Device::default();

    let train_set = load_dataset(&config.data, Split::Train).context("Failed to load training split")?;
    let test_set = load_dataset(&config.data, Split::Test).context("Failed to load test split")?;

    match config.model.clone() {
        Architecture::Cnn(model_config) => {
            let model = Cnn::<Backend>::new(model_config, &device);
            train_and_save(model, &config, train_set, test_set, args.resume, &device)
        }
        Architecture::Vgg(model_config) => {
            let model = Vgg::<Backend>::new(model_config, &device);
            train_and_save(model, &config, train_set, test_set, args.resume, &device)
        }
    }
}

fn train_and_save<M>(
    model: M,
    config: &TrainConfig,
    train_set: InMemoryDataset,
    test_set: InMemoryDataset,
    resume: bool,
    device: &Device,
) -> Result<()>
where
    M: ImageClassifier<Backend> + AutodiffModule<Backend>,
    M::InnerModule: ImageClassifier<InnerBackend>,
{
    let checkpoint_path = &config.output.checkpoint_path;

    let trainer = if resume && checkpoint_path.exists() {
        let checkpoint = load_checkpoint(checkpoint_path)?;
        ClassifierTrainer::resume(model, config.training.clone(), &checkpoint, device)?
    } else {
        if resume {
            warn!("No checkpoint at {:?}, starting from scratch", checkpoint_path);
        }
        ClassifierTrainer::new(model, config.training.clone(), device)
    };

    let mut train_loader = BatchLoader::<Backend, _>::shuffled(
        train_set,
        config.training.batch_size,
        config.training.seed,
        device.clone(),
    );

    info!("Start training...");
    let model = trainer.run(&mut train_loader, checkpoint_path, &mut LogObserver)?;
    info!("Training is completed");

    let model = model.valid();
    let mut test_loader = BatchLoader::<InnerBackend, _>::sequential(
        test_set,
        config.training.eval_batch_size,
        device.clone(),
    );
    report_test_results(&model, &mut test_loader)?;

    info!("saving model...");
    save_parameter_state::<InnerBackend, _>(&model, &config.output.model_state_path)?;
    save_full_model::<InnerBackend, _>(&model, &config.output.model_path)?;
    Ok(())
}

fn eval_command(args: EvalArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let device = Device::default();

    let model = load_full_model::<InnerBackend>(&args.model, &device)
        .with_context(|| format!("Failed to load model from {:?}", args.model))?;
    info!("Loaded {} model", model.architecture());

    let test_set = load_dataset(&config.data, Split::Test).context("Failed to load test split")?;
    let mut test_loader =
        BatchLoader::<InnerBackend, _>::sequential(test_set, config.training.eval_batch_size, device);
    report_test_results(&model, &mut test_loader)
}

fn report_test_results<M: ImageClassifier<InnerBackend>>(
    model: &M,
    test_loader: &mut BatchLoader<InnerBackend, InMemoryDataset>,
) -> Result<()> {
    let metric = evaluate(model, test_loader).context("Evaluation failed")?;
    let accuracy = metric
        .accuracy()
        .context("Test collection is empty, accuracy is undefined")?;
    info!("test accuracy: {:.3}", accuracy);

    if let Some(preview) = preview_predictions(model, test_loader)? {
        info!("\n{}", preview);
    }
    Ok(())
}
