//! Smart-weight trainer CLI
//!
//! Trains the scoring model and writes the composite artifact, inspects an
//! existing artifact, or exports the resolved feature order as a schema.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use smartweight_core::artifact::{read_transforms, split_native_model};
use smartweight_core::model::count_trees;
use smartweight_core::WeightError;
use smartweight_trainer::pipeline::resolve_order;
use smartweight_trainer::{BackendKind, Pipeline, TrainerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "smartweight-train")]
#[command(author = "IPPAN Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trainer for the smart-weight connection scoring model", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model and write the artifact
    Train(TrainArgs),
    /// Print the metadata of an existing artifact
    Inspect {
        /// Artifact path
        artifact: PathBuf,

        /// Feature count the runtime will pass
        #[arg(long)]
        expected_features: Option<usize>,
    },
    /// Write the resolved feature order as a JSON schema
    ExportSchema {
        /// Go source or schema to resolve
        #[arg(long)]
        feature_source: Option<PathBuf>,

        /// Destination file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Go source declaring the feature order, or a JSON schema
    #[arg(long)]
    feature_source: Option<PathBuf>,

    /// Training CSV
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Artifact destination
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Boosting backend (builtin, lightgbm_cli)
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Maximum boosting rounds
    #[arg(long)]
    rounds: Option<usize>,

    /// Learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Early stopping patience (0 disables)
    #[arg(long)]
    early_stopping_rounds: Option<usize>,

    /// Seed for deterministic shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Abort training after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Also emit top-level order and definitions blocks
    #[arg(long)]
    legacy_layout: bool,

    /// Skip dataset shuffling
    #[arg(long)]
    no_shuffle: bool,
}

impl TrainArgs {
    fn apply(self, config: &mut TrainerConfig) {
        if let Some(path) = self.feature_source {
            config.paths.feature_source = path;
        }
        if let Some(path) = self.data {
            config.paths.data = path;
        }
        if let Some(path) = self.output {
            config.paths.output = path;
        }
        if let Some(backend) = self.backend {
            config.training.backend = backend;
        }
        if let Some(rounds) = self.rounds {
            config.training.num_rounds = rounds;
        }
        if let Some(lr) = self.learning_rate {
            config.training.learning_rate = lr;
        }
        if let Some(patience) = self.early_stopping_rounds {
            config.training.early_stopping_rounds = patience;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        if let Some(secs) = self.timeout_secs {
            config.training.timeout_secs = Some(secs);
        }
        if self.legacy_layout {
            config.artifact.layout = smartweight_core::ArtifactLayout::Legacy;
        }
        if self.no_shuffle {
            config.training.shuffle = false;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("{:#}", err);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            let code = err
                .downcast_ref::<WeightError>()
                .map(|e| e.kind().exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn load_config(path: Option<&PathBuf>) -> Result<TrainerConfig> {
    let mut config = match path {
        Some(path) => TrainerConfig::load_from_file(path)?,
        None => TrainerConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Train(args) => {
            args.apply(&mut config);
            train(config)
        }
        Command::Inspect {
            artifact,
            expected_features,
        } => inspect(artifact, expected_features),
        Command::ExportSchema {
            feature_source,
            output,
        } => {
            if let Some(path) = feature_source {
                config.paths.feature_source = path;
            }
            export_schema(&config, output)
        }
    }
}

fn train(config: TrainerConfig) -> Result<()> {
    info!("Smart-weight trainer v{}", env!("CARGO_PKG_VERSION"));
    info!("Feature source: {}", config.paths.feature_source.display());
    info!("Training data: {}", config.paths.data.display());
    info!("Output: {}", config.paths.output.display());
    info!(
        "Rounds: {}, learning rate: {}, early stopping: {}, seed: {}",
        config.training.num_rounds,
        config.training.learning_rate,
        config.training.early_stopping_rounds,
        config.training.seed
    );

    let summary = Pipeline::new(config).run()?;

    info!("Training completed successfully");
    info!("  Feature order: {:?} ({} features)", summary.order_source, summary.feature_count);
    info!(
        "  Rows: {} ({} train / {} validation)",
        summary.rows, summary.train_rows, summary.valid_rows
    );
    info!(
        "  Backend: {}, best iteration {} of {}",
        summary.backend, summary.best_iteration, summary.total_iterations
    );
    info!("  Artifact: {} ({} bytes)", summary.receipt.path.display(), summary.receipt.bytes);
    info!("  BLAKE3: {}", summary.receipt.blake3);
    Ok(())
}

fn inspect(artifact: PathBuf, expected_features: Option<usize>) -> Result<()> {
    let transforms = read_transforms(&artifact)?;
    if !transforms.enabled {
        warn!("{} carries no transforms section", artifact.display());
    }

    let expected = expected_features.unwrap_or(transforms.order.len());
    transforms.validate(expected)?;

    let content = std::fs::read_to_string(&artifact)
        .with_context(|| format!("Failed to read {}", artifact.display()))?;
    let native = split_native_model(&content).unwrap_or(&content);
    let hash = hex::encode(blake3::hash(content.as_bytes()).as_bytes());

    println!("artifact: {}", artifact.display());
    println!("bytes: {}", content.len());
    println!("blake3: {}", hash);
    println!("trees: {}", count_trees(native));
    println!("transform: {}", transforms.enabled);
    println!("features: {}", transforms.order.len());
    for (idx, name) in &transforms.order {
        println!("  {}={}", idx, name);
    }
    for t in &transforms.transforms {
        println!("{} ({}): {:?}", t.id, t.kind.type_name(), t.indices);
    }
    println!("untransformed: {}", transforms.untransformed.join(","));
    Ok(())
}

fn export_schema(config: &TrainerConfig, output: Option<PathBuf>) -> Result<()> {
    let (order, source) = resolve_order(config)?;
    let json = order.to_schema_json()?;

    match output {
        Some(path) => {
            std::fs::write(&path, format!("{}\n", json))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                "Wrote {} features ({:?}) to {}",
                order.len(),
                source,
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
