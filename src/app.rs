//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real entry point that:
//! - loads `.env` and sets up logging
//! - parses CLI arguments
//! - dispatches to the pipeline (`fit`, `model`) or the dataset generator

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, ConfigArgs, FitArgs, SimulateArgs};
use crate::data::{SynthSpec, write_synthetic_dataset};
use crate::domain::PrfConfig;
use crate::error::PrfError;

pub mod pipeline;

/// Entry point for the `prf` binary.
pub fn run() -> Result<(), PrfError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref(), cli.log_level);
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Model(args) => handle_model(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

/// `RUST_LOG` (from the environment or `.env`) wins over `--log-level`.
fn log_filter(rust_log: Option<&str>, fallback: tracing::Level) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback.as_str().to_ascii_lowercase()))
}

/// Load the config file and apply command-line overrides.
pub fn config_from_args(args: &FitArgs) -> Result<PrfConfig, PrfError> {
    let mut config = PrfConfig::load(&args.config.config)?;
    if let Some(backend) = args.backend {
        config.version = backend;
    }
    if let Some(par) = args.par {
        config.par = par;
    }
    Ok(config)
}

fn handle_fit(args: FitArgs) -> Result<(), PrfError> {
    let config = config_from_args(&args)?;
    let run = pipeline::run_fit(&config)?;

    println!(
        "{}",
        crate::report::format_run_summary(run.backend, run.candidates, &run.results, args.top)
    );
    if args.csv {
        let path = pipeline::output_path(&config, "_results.csv");
        crate::io::export::write_results_csv(&path, &run.mask, &run.results)?;
        info!(path = %path.display(), "results CSV written");
    }
    for path in &run.written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn handle_model(args: ConfigArgs) -> Result<(), PrfError> {
    let config = PrfConfig::load(&args.config)?;
    let bank = pipeline::build_bank(&config)?;
    println!(
        "model bank: {} candidates x {} volumes -> {}",
        bank.n_candidates(),
        bank.n_volumes(),
        config.path_mdl.display()
    );
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), PrfError> {
    let spec = SynthSpec {
        seed: args.seed,
        frames_per_run: args.frames,
        noise_sd: args.noise,
        ..SynthSpec::default()
    };
    let dataset = write_synthetic_dataset(&args.out, &spec)?;
    println!(
        "synthetic dataset: {} voxels in mask, config at {}",
        dataset.mask.n_selected(),
        dataset.config_path.display()
    );
    Ok(())
}
