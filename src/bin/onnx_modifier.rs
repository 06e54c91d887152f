//! onnx-modifier command line
//!
//! Applies a list of rewrite passes to an ONNX model file.
//!
//! # Usage
//!
//! ```bash
//! # Full preset, shapes answered from a JSON table
//! onnx-modifier model.onnx -o model_result.onnx --all --shapes shapes.json
//!
//! # Selected passes, keeping every intermediate model
//! onnx-modifier model.onnx -o out.onnx --pass simplify_name --pass merge_slice \
//!     --save-intermediate steps/
//! ```

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use onnx_modifier::io::{load_graph, write_bytes, StructuralChecker};
use onnx_modifier::oracle::{ExecutionBackend, ShapeOracle, StaticShapes, Unavailable};
use onnx_modifier::pipeline::{PassId, Pipeline, PipelineConfig, PipelineEvent};
use onnx_modifier::simplifier::DeadCodeSimplifier;
use onnx_modifier::{OnnxResult, TransformError};

/// Shape-aware ONNX graph rewriting
#[derive(Parser, Debug)]
#[command(name = "onnx-modifier", version, about, long_about = None)]
struct Cli {
    /// Input ONNX model
    input: PathBuf,

    /// Where to write the rewritten model
    #[arg(short, long)]
    output: PathBuf,

    /// Pass to apply; repeat to build the sequence
    #[arg(long = "pass", value_name = "PASS")]
    passes: Vec<PassId>,

    /// Apply the full preset
    #[arg(long, conflicts_with = "passes")]
    all: bool,

    /// Pipeline config (JSON); --pass and --all override its pass list
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the model after every pass into this directory
    #[arg(long, value_name = "DIR")]
    save_intermediate: Option<PathBuf>,

    /// Tensor shape table (JSON object of name -> dims) answering shape queries
    #[arg(long, value_name = "FILE")]
    shapes: Option<PathBuf>,

    /// Concrete shape for a graph input, e.g. `images=1,3,224,224`
    #[arg(long = "input-shape", value_name = "NAME=DIMS", value_parser = parse_input_shape)]
    input_shapes: Vec<(String, Vec<i64>)>,

    /// Seed for the synthetic inputs fed to the shape backend
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_input_shape(arg: &str) -> Result<(String, Vec<i64>), String> {
    let (name, dims) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=DIMS, got '{}'", arg))?;
    let dims = dims
        .split(',')
        .map(|d| d.trim().parse::<i64>().map_err(|e| format!("bad dim '{}': {}", d, e)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name.to_string(), dims))
}

fn build_config(cli: &Cli) -> OnnxResult<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json(&fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };

    if cli.all {
        config.passes = PassId::default_sequence();
    } else if !cli.passes.is_empty() {
        config.passes = cli.passes.clone();
    }
    if cli.save_intermediate.is_some() {
        config.save_intermediate = true;
    }
    if let Some(stem) = cli.input.file_stem().and_then(|s| s.to_str()) {
        config.artifact_stem = stem.to_string();
    }
    Ok(config)
}

fn build_backend(cli: &Cli) -> OnnxResult<Box<dyn ExecutionBackend>> {
    match &cli.shapes {
        Some(path) => {
            let table = StaticShapes::from_json(&fs::read_to_string(path)?)?;
            info!("loaded {} tensor shapes from {}", table.len(), path.display());
            Ok(Box::new(table))
        }
        None => Ok(Box::new(Unavailable)),
    }
}

fn run(cli: &Cli) -> OnnxResult<()> {
    let config = build_config(cli)?;
    let graph = load_graph(&cli.input)?;
    info!(
        "loaded {} ({} nodes), {} passes",
        cli.input.display(),
        graph.nodes().len(),
        config.passes.len()
    );

    let oracle = cli
        .input_shapes
        .iter()
        .fold(ShapeOracle::new(build_backend(cli)?), |oracle, (name, dims)| {
            oracle.with_input_shape(name, dims.clone())
        })
        .with_seed(cli.seed);

    if let Some(dir) = &cli.save_intermediate {
        fs::create_dir_all(dir)?;
    }

    let mut write_error: Option<TransformError> = None;
    let mut observer = |event: &PipelineEvent<'_>| {
        if let (PipelineEvent::Artifact(artifact), Some(dir)) = (event, &cli.save_intermediate) {
            let path = dir.join(&artifact.name);
            match write_bytes(&artifact.bytes, &path) {
                Ok(()) => info!("wrote {}", path.display()),
                Err(e) if write_error.is_none() => write_error = Some(e),
                Err(_) => {}
            }
        }
    };

    let pipeline = Pipeline::new(&oracle, &DeadCodeSimplifier, &StructuralChecker);
    let outcome = pipeline.run(&graph, &config, &mut observer)?;
    if let Some(e) = write_error {
        return Err(e);
    }

    write_bytes(&outcome.result.bytes, &cli.output)?;
    info!(
        "wrote {} ({} nodes)",
        cli.output.display(),
        outcome.graph.nodes().len()
    );
    Ok(())
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.failing_pass() {
                Some(pass) => error!("pass `{}` failed: {}", pass, e.root()),
                None => error!("{}", e),
            }
            error!("input: {}", cli.input.display());
            ExitCode::FAILURE
        }
    }
}
