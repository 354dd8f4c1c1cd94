//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and installs the logger
//! - parses CLI arguments
//! - runs the selected command
//! - prints reports and writes optional exports

use clap::Parser;
use log::info;

use crate::cli::{Command, FitArgs, SimulateArgs, TacArgs};
use crate::data::sample::{simulate_tacs, NoiseSpec};
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::fit::{evaluate_all, jacobian_at};
use crate::io::{read_matrix, write_curves_csv, write_matrix, write_params_csv, write_summary_json, Session};

pub mod pipeline;

/// Entry point for the `kfit` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Tac(args) => handle_tac(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args);
    let run = pipeline::run_fit(&config)?;

    println!("{}", crate::report::format_run_summary(&run.summary));

    // Optional exports.
    if let Some(path) = &config.export_params {
        write_params_csv(path, &run.output)?;
        info!("wrote parameters to {}", path.display());
    }
    if let Some(path) = &config.export_curves {
        write_curves_csv(path, &run.output)?;
        info!("wrote curves to {}", path.display());
    }
    if let Some(path) = &config.summary {
        write_summary_json(path, &run.summary)?;
        info!("wrote summary to {}", path.display());
    }

    Ok(())
}

fn handle_tac(args: TacArgs) -> Result<(), AppError> {
    let session = Session::load(&args.session)?;
    let ctx = session.context();
    let params = read_matrix(&args.params)?;
    let curves = evaluate_all(ctx, &params)?;

    match &args.out {
        Some(path) => write_matrix(path, &curves)?,
        None => println!(
            "{}",
            crate::report::format_curves(&ctx.timing().mid_times(), &curves)
        ),
    }

    if let Some(path) = &args.jacobian {
        if params.ncols() == 0 {
            return Err(AppError::new(3, "Parameter file has no columns."));
        }
        let first: Vec<f64> = params.column(0).iter().copied().collect();
        let (_, jac) = jacobian_at(ctx, &first)?;
        write_matrix(path, &jac)?;
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let session = Session::load(&args.session)?;
    let noise = NoiseSpec {
        level: args.noise,
        seed: args.seed,
    };
    let tacs = simulate_tacs(session.context(), &args.truth, args.voxels, noise)?;
    write_matrix(&args.out, &tacs)?;
    info!("wrote {} simulated voxels to {}", args.voxels, args.out.display());
    Ok(())
}

fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        session: args.session.clone(),
        threads: args.threads,
        max_iterations: args.max_iterations,
        export_params: args.export_params.clone(),
        export_curves: args.export_curves.clone(),
        summary: args.summary.clone(),
    }
}
