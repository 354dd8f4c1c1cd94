//! Run summaries and formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays free of presentation concerns
//! - output changes are localized

use chrono::Local;
use nalgebra::DMatrix;

use crate::domain::{ParamSummary, RunSummary};
use crate::fit::BatchOutput;
use crate::models::KineticContext;

/// Mean / min / max of each parameter row across voxels, skipping
/// non-finite entries. Empty when there are no voxels.
pub fn param_summaries(names: &[&str], params: &DMatrix<f64>) -> Vec<ParamSummary> {
    if params.ncols() == 0 {
        return Vec::new();
    }
    names
        .iter()
        .zip(params.row_iter())
        .map(|(name, row)| {
            let finite: Vec<f64> = row.iter().copied().filter(|v| v.is_finite()).collect();
            let n = finite.len().max(1) as f64;
            ParamSummary {
                name: name.to_string(),
                mean: finite.iter().sum::<f64>() / n,
                min: finite.iter().copied().fold(f64::INFINITY, f64::min),
                max: finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect()
}

/// Assemble the persisted summary of a `fit` run.
pub fn build_run_summary(ctx: &KineticContext, output: &BatchOutput) -> RunSummary {
    let report = &output.report;
    let wrss = &report.wrss;
    let mean_wrss = if wrss.is_empty() {
        0.0
    } else {
        wrss.iter().sum::<f64>() / wrss.len() as f64
    };

    RunSummary {
        tool: "kfit".to_string(),
        generated: Local::now(),
        model: ctx.model().kind(),
        voxels: output.params.ncols(),
        frames: ctx.num_frames(),
        workers: report.workers,
        outcomes: report.outcomes,
        warnings: report.warnings.iter().map(|w| w.to_string()).collect(),
        params: param_summaries(ctx.model().param_names(), &output.params),
        mean_wrss,
    }
}

/// Format the run summary for the terminal.
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    out.push_str("=== kfit - kinetic model fit ===\n");
    out.push_str(&format!("Model: {}\n", summary.model.display_name()));
    out.push_str(&format!(
        "Voxels: {} | frames: {} | workers: {}\n",
        summary.voxels, summary.frames, summary.workers
    ));
    out.push_str(&format!(
        "Outcomes: converged={} iteration-limit={} damping-limit={}\n",
        summary.outcomes.converged, summary.outcomes.iteration_limit, summary.outcomes.damping_limit
    ));
    out.push_str(&format!("Mean weighted RSS: {:.6e}\n", summary.mean_wrss));

    if !summary.params.is_empty() {
        out.push_str("\nParameters:\n");
        out.push_str(&format!("  {:<6} {:>12} {:>12} {:>12}\n", "name", "mean", "min", "max"));
        for p in &summary.params {
            out.push_str(&format!(
                "  {:<6} {:>12.6} {:>12.6} {:>12.6}\n",
                p.name, p.mean, p.min, p.max
            ));
        }
    }

    if !summary.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &summary.warnings {
            out.push_str(&format!("  - {w}\n"));
        }
    }

    out
}

/// Format model TACs as a table: one row per frame, one column per voxel.
pub fn format_curves(mid_times: &[f64], curves: &DMatrix<f64>) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:>10}", "t_mid"));
    for v in 0..curves.ncols() {
        out.push_str(&format!(" {:>14}", format!("voxel{}", v + 1)));
    }
    out.push('\n');
    for (f, t) in mid_times.iter().enumerate() {
        out.push_str(&format!("{t:>10.3}"));
        for v in 0..curves.ncols() {
            out.push_str(&format!(" {:>14.6e}", curves[(f, v)]));
        }
        out.push('\n');
    }
    out
}
