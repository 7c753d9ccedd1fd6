//! Command-line parsing for the pRF mapper.
//!
//! Argument parsing and command dispatch stay separate from the modelling and
//! fitting code; everything here ends up as a `PrfConfig` or a `SynthSpec`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::BackendKind;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "prf", version, about = "Population receptive field mapping for fMRI")]
pub struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a pRF model to every voxel in the mask and write parameter maps.
    Fit(FitArgs),
    /// Build the model bank for a configuration and store it, without fitting.
    Model(ConfigArgs),
    /// Write a small synthetic dataset (frames, functional runs, mask, config).
    Simulate(SimulateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    pub config: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Override the fitting backend (`strVersion`).
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Override the number of parallel chunks (`varPar`).
    #[arg(long)]
    pub par: Option<usize>,

    /// Print the N best-fitting voxels.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Also write per-voxel results as CSV next to the maps.
    #[arg(long)]
    pub csv: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Output directory.
    #[arg(short, long)]
    pub out: PathBuf,

    /// Random seed.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Frames (and volumes) per run.
    #[arg(long, default_value_t = 40)]
    pub frames: usize,

    /// Noise SD relative to the peak response.
    #[arg(long, default_value_t = 0.02)]
    pub noise: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_overrides_parse() {
        let cli = Cli::parse_from(["prf", "--log-level", "debug", "fit", "-c", "cfg.json", "--backend", "bulk", "--par", "4"]);
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        match cli.command {
            Command::Fit(args) => {
                assert_eq!(args.config.config, PathBuf::from("cfg.json"));
                assert_eq!(args.backend, Some(BackendKind::Bulk));
                assert_eq!(args.par, Some(4));
                assert!(!args.csv);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn simulate_defaults() {
        let cli = Cli::parse_from(["prf", "simulate", "--out", "demo"]);
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.seed, 7);
                assert_eq!(args.frames, 40);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
