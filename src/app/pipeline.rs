//! Shared "fit pipeline" logic.
//!
//! session load -> batch input -> parallel fit -> summary
//!
//! The caller focuses on presentation and exports.

use crate::domain::{FitConfig, RunSummary};
use crate::error::AppError;
use crate::fit::{fit_all, BatchOutput, DriverOptions};
use crate::io::Session;
use crate::report::build_run_summary;

/// All computed outputs of a single `kfit fit` run.
#[derive(Debug)]
pub struct RunOutput {
    pub session: Session,
    pub output: BatchOutput,
    pub summary: RunSummary,
}

/// Execute the full fitting pipeline and return the computed outputs.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let session = Session::load(&config.session)?;
    let mut batch = session.batch()?;
    if let Some(n) = config.max_iterations {
        batch.max_iterations = n;
    }

    let opts = DriverOptions {
        threads: config.threads,
        ..DriverOptions::default()
    };
    let output = fit_all(session.context(), &batch, &opts)?;
    let summary = build_run_summary(session.context(), &output);

    Ok(RunOutput {
        session,
        output,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{feng_plasma, sample_curve, simulate_tacs, NoiseSpec};
    use crate::io::matrix::write_matrix;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use std::fs;
    use std::path::Path;

    fn write_session(dir: &Path) -> std::path::PathBuf {
        let start: Vec<f64> = (0..30).map(|i| i as f64 * 2.0).collect();
        write_matrix(&dir.join("frames.csv"), &DMatrix::from_column_slice(30, 1, &start)).unwrap();
        let plasma = sample_curve(feng_plasma, 0.05, 62.0);
        write_matrix(
            &dir.join("blood.csv"),
            &DMatrix::from_column_slice(plasma.len(), 1, &plasma),
        )
        .unwrap();
        // Noiseless voxels first so the context is available to simulate them.
        write_matrix(&dir.join("tac.csv"), &DMatrix::zeros(30, 1)).unwrap();
        let manifest = r#"{
            "model": "one-tissue",
            "decay_constant": 0.0063,
            "scan_times": "frames.csv",
            "frame_duration": 2.0,
            "blood": "blood.csv",
            "blood_step": 0.05,
            "tac": "tac.csv",
            "initial": [0.1, 0.1],
            "lower": [0, 0],
            "upper": [5, 5],
            "max_iterations": 50
        }"#;
        let path = dir.join("session.json");
        fs::write(&path, manifest).unwrap();

        let session = Session::load(&path).unwrap();
        let tac = simulate_tacs(session.context(), &[0.5, 0.3], 3, NoiseSpec { level: 0.0, seed: 0 }).unwrap();
        write_matrix(&dir.join("tac.csv"), &tac).unwrap();
        path
    }

    #[test]
    fn fit_pipeline_recovers_simulated_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_session(dir.path());
        let config = FitConfig {
            session: path,
            threads: Some(2),
            max_iterations: None,
            export_params: None,
            export_curves: None,
            summary: None,
        };
        let run = run_fit(&config).unwrap();
        assert_eq!(run.output.params.shape(), (2, 3));
        for v in 0..3 {
            assert_relative_eq!(run.output.params[(0, v)], 0.5, max_relative = 1e-2);
            assert_relative_eq!(run.output.params[(1, v)], 0.3, max_relative = 1e-2);
        }
        assert_eq!(run.summary.voxels, 3);
        assert_eq!(run.summary.outcomes.total(), 3);
    }
}
