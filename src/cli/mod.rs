use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// wakecrnn: CRNN wake-word model builder and evaluator
#[derive(Parser, Debug)]
#[command(name = "wakecrnn")]
#[command(about = "Build, name, export and evaluate CRNN wake-word detectors")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a model from a configuration and optionally export fresh weights
    Build(BuildArgs),

    /// Print the identity string of a configuration
    Identity(IdentityArgs),

    /// Evaluate a stored detector on a labeled dataset
    Evaluate(EvaluateArgs),

    /// Write half-precision copies of a stored model
    Quantize(QuantizeArgs),
}

/// Build arguments
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Model configuration file (JSON); defaults are used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Build the per-frame sequence labeler with this many labels
    #[arg(long)]
    pub num_labels: Option<usize>,

    /// Directory to export the initialized encoder and detector into
    #[arg(short, long)]
    pub export: Option<PathBuf>,

    /// Skip the half-precision copies on export
    #[arg(long)]
    pub no_quant: bool,

    /// Random seed for weight initialization
    #[arg(long, default_value = "2026")]
    pub seed: u64,
}

/// Identity arguments
#[derive(Parser, Debug)]
pub struct IdentityArgs {
    /// Model configuration file (JSON); defaults are used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name the per-frame sequence labeler with this many labels
    #[arg(long)]
    pub num_labels: Option<usize>,
}

/// Evaluation arguments
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Labeled feature file (CSV or TSV, optionally gzipped)
    #[arg(short, long, required = true)]
    pub dataset: PathBuf,

    /// Model prefix: `<store dir>/<identity>`
    #[arg(short, long, required = true)]
    pub model: PathBuf,

    /// Frequency bins per frame in the dataset
    #[arg(short, long, default_value = "40")]
    pub num_features: usize,

    /// Scores below this are negative decisions
    #[arg(short, long, default_value = "0.5")]
    pub threshold: f64,

    /// Batch size for prediction
    #[arg(short, long, default_value = "64")]
    pub batch_size: usize,

    /// Evaluate the half-precision weights
    #[arg(long)]
    pub quantized: bool,

    /// Output file for the evaluation report (JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Quantization arguments
#[derive(Parser, Debug)]
pub struct QuantizeArgs {
    /// Model prefix: `<store dir>/<identity>`
    #[arg(short, long, required = true)]
    pub model: PathBuf,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Install the log subscriber; `RUST_LOG` wins over `--verbose`
pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
