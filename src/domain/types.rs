//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - read from a session manifest
//! - carried through the fitting pipeline
//! - exported to the JSON run summary

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Compartmental topology used to evaluate TACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// One tissue compartment: `K1, k2`.
    OneTissue,
    /// Two tissue compartments with a vascular fraction: `K1, k2, k3, k4, vb`.
    TwoTissue,
    /// Dual-input (hepatic artery + portal vein) liver model with delay:
    /// `K1, k2, k3, k4, vb, fa, ka, t0`.
    Liver,
}

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::OneTissue => "1TCM",
            ModelKind::TwoTissue => "2TCM",
            ModelKind::Liver => "Liver (dual input)",
        }
    }

    /// Parameter names in column order.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::OneTissue => &["K1", "k2"],
            ModelKind::TwoTissue => &["K1", "k2", "k3", "k4", "vb"],
            ModelKind::Liver => &["K1", "k2", "k3", "k4", "vb", "fa", "ka", "t0"],
        }
    }
}

/// Terminal state of one Levenberg-Marquardt run.
///
/// None of these is an error: every state returns the best parameters found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// The RSS or the step fell below tolerance (or nothing was free to move).
    Converged,
    /// The accepted-step counter reached the caller's cap.
    IterationLimit,
    /// Damping grew past its ceiling without finding a better point.
    DampingLimit,
}

/// Per-batch counts of terminal states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub converged: usize,
    pub iteration_limit: usize,
    pub damping_limit: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, t: Termination) {
        match t {
            Termination::Converged => self.converged += 1,
            Termination::IterationLimit => self.iteration_limit += 1,
            Termination::DampingLimit => self.damping_limit += 1,
        }
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.converged += other.converged;
        self.iteration_limit += other.iteration_limit;
        self.damping_limit += other.damping_limit;
    }

    pub fn total(&self) -> usize {
        self.converged + self.iteration_limit + self.damping_limit
    }
}

/// A full `kfit fit` run configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults); the data itself comes from
/// the session manifest.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub session: PathBuf,
    /// Worker pool size; `None` uses the available parallelism.
    pub threads: Option<usize>,
    /// Overrides the manifest's `max_iterations`.
    pub max_iterations: Option<usize>,

    pub export_params: Option<PathBuf>,
    pub export_curves: Option<PathBuf>,
    pub summary: Option<PathBuf>,
}

/// Distribution of one fitted parameter across voxels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    pub name: String,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// A saved run summary (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub tool: String,
    pub generated: DateTime<Local>,
    pub model: ModelKind,
    pub voxels: usize,
    pub frames: usize,
    pub workers: usize,
    pub outcomes: OutcomeCounts,
    pub warnings: Vec<String>,
    pub params: Vec<ParamSummary>,
    /// Mean weighted residual sum of squares over voxels.
    pub mean_wrss: f64,
}
