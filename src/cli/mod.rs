//! Command-line parsing for `kfit`.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "kfit", version, about = "PET compartmental model fitting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every voxel of a session and print a summary.
    Fit(FitArgs),
    /// Evaluate model TACs (and optionally the Jacobian) for given parameters.
    Tac(TacArgs),
    /// Generate noisy synthetic TACs from known parameters.
    Simulate(SimulateArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Session manifest (JSON).
    #[arg(short = 's', long)]
    pub session: PathBuf,

    /// Worker threads (default: available parallelism).
    #[arg(short = 'j', long, env = "KFIT_THREADS")]
    pub threads: Option<usize>,

    /// Override the manifest's iteration cap.
    #[arg(long = "max-iter")]
    pub max_iterations: Option<usize>,

    /// Write fitted parameters (params x voxels) to CSV.
    #[arg(long = "export-params")]
    pub export_params: Option<PathBuf>,

    /// Write fitted curves (frames x voxels) to CSV.
    #[arg(long = "export-curves")]
    pub export_curves: Option<PathBuf>,

    /// Write the run summary to JSON.
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct TacArgs {
    /// Session manifest (JSON); only timing, blood and model are used.
    #[arg(short = 's', long)]
    pub session: PathBuf,

    /// Parameters (params x voxels CSV).
    #[arg(short = 'p', long)]
    pub params: PathBuf,

    /// Write the Jacobian (frames x params) at the first parameter column.
    #[arg(long)]
    pub jacobian: Option<PathBuf>,

    /// Write TACs (frames x voxels) to CSV instead of printing them.
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Session manifest (JSON); only timing, blood and model are used.
    #[arg(short = 's', long)]
    pub session: PathBuf,

    /// True parameters, comma separated.
    #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
    pub truth: Vec<f64>,

    /// Number of noisy voxels.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub voxels: usize,

    /// Noise scale (0 = noiseless).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output CSV (frames x voxels).
    #[arg(short = 'o', long)]
    pub out: PathBuf,
}
