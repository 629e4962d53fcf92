use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use burn::config::Config;
use burn::module::Module;
use burn::tensor::backend::Backend;
use tracing::{error, info};
use wakecrnn::cli::{parse_args, setup_logging, BuildArgs, Commands, EvaluateArgs, IdentityArgs, QuantizeArgs};
use wakecrnn::data::loader::DatasetLoader;
use wakecrnn::evaluation::predictor::Evaluator;
use wakecrnn::model::architecture::init_model;
use wakecrnn::model::artifacts::{ArtifactStore, Precision};
use wakecrnn::model::identity::derive_identity;
use wakecrnn::model::{CrnnConfig, Variant};
use wakecrnn::utils::{format_duration, format_number, validation};
use wakecrnn::DefaultBackend;

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", wakecrnn::info());

    let result = match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Identity(args) => run_identity(args),
        Commands::Evaluate(args) => run_evaluate(args),
        Commands::Quantize(args) => run_quantize(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Configuration from file (or defaults), with an optional labeler override
fn load_config(path: Option<&Path>, num_labels: Option<usize>) -> Result<CrnnConfig> {
    let config = match path {
        Some(path) => CrnnConfig::load(path)
            .map_err(|err| anyhow::anyhow!("{err:?}"))
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => CrnnConfig::classifier(),
    };

    Ok(match num_labels {
        Some(num_labels) => config.with_variant(Variant::SequenceLabeler { num_labels }),
        None => config,
    })
}

fn run_build(args: BuildArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.num_labels)?;

    DefaultBackend::seed(args.seed);
    let device = <DefaultBackend as Backend>::Device::default();

    let (spec, model) = init_model::<DefaultBackend>(&config, &device)
        .context("Failed to build model")?;

    println!("{spec}");
    println!("parameters: {}", format_number(model.num_params()));

    if let Some(dir) = args.export {
        let store = ArtifactStore::new(&dir)?.with_quantized(!args.no_quant);
        let artifacts = store
            .export(&model, &spec)
            .with_context(|| format!("Failed to export {} to {:?}", spec.identity, dir))?;

        for handle in &artifacts.handles {
            info!("{:?} ({} precision): {:?}", handle.part, handle.precision, handle.weights);
        }
        info!("Model prefix: {:?}", dir.join(&artifacts.identity));
    }

    Ok(())
}

fn run_identity(args: IdentityArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.num_labels)?;
    config.validate().context("Invalid configuration")?;
    println!("{}", derive_identity(&config));
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    validation::in_range(args.threshold, 0.0, 1.0, "threshold")?;
    validation::positive(args.batch_size, "batch size")?;
    validation::positive(args.num_features, "number of features")?;

    let started = Instant::now();
    let device = <DefaultBackend as Backend>::Device::default();

    let dataset = DatasetLoader::new(args.num_features)
        .load(&args.dataset)
        .with_context(|| format!("Failed to load dataset from {:?}", args.dataset))?;

    let (store, identity) = ArtifactStore::from_prefix(&args.model)?;
    let precision = if args.quantized {
        Precision::Half
    } else {
        Precision::Full
    };
    let (_, model) = store
        .load_model::<DefaultBackend>(&identity, precision, &device)
        .with_context(|| format!("Failed to load model from {:?}", args.model))?;

    let report = Evaluator::new()
        .with_threshold(args.threshold)
        .with_batch_size(args.batch_size)
        .with_progress(true)
        .evaluate(&model, &dataset, &device)
        .context("Evaluation failed")?;

    report.print();

    if let Some(output) = args.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&output, json)
            .with_context(|| format!("Failed to write report to {:?}", output))?;
        info!("Evaluation report saved to: {:?}", output);
    }

    info!("Evaluation took {}", format_duration(started.elapsed().as_secs_f64()));
    Ok(())
}

fn run_quantize(args: QuantizeArgs) -> Result<()> {
    let device = <DefaultBackend as Backend>::Device::default();
    let (store, identity) = ArtifactStore::from_prefix(&args.model)?;

    let artifacts = store
        .quantize::<DefaultBackend>(&identity, &device)
        .with_context(|| format!("Failed to quantize {:?}", args.model))?;

    for handle in &artifacts.handles {
        info!("{:?}: {:?}", handle.part, handle.weights);
    }
    Ok(())
}
