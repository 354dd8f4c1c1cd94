//! Parallel fitting of a voxel batch.
//!
//! The voxel range is split into one contiguous chunk per worker. Output
//! matrices are column-major, so a chunk of voxels is a contiguous slice of
//! each output and `par_chunks_mut` hands every worker its own columns.
//! Each worker allocates one [`LmWorkspace`] and reuses it for all of its
//! voxels.

use std::collections::TryReserveError;

use log::{debug, info, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use thiserror::Error;

use crate::domain::OutcomeCounts;
use crate::fit::levmar::{fit_voxel, FitProblem, LmConfig, LmWorkspace};
use crate::models::KineticContext;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("input shape mismatch: {0}")]
    Shape(String),
    #[error("worker {worker} could not allocate its scratch buffers")]
    ScratchAllocation {
        worker: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("failed to create thread pool: {0}")]
    ThreadPool(String),
}

/// Non-fatal input problems; the batch proceeds with the stated reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputWarning {
    #[error("initial parameters given as a single row of {params}; treating it as one column shared by all voxels")]
    SingleRowInitial { params: usize },
}

/// Frame weights for the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightInput {
    /// One column read by every voxel.
    Shared(Vec<f64>),
    /// Frames x voxels.
    PerVoxel(DMatrix<f64>),
}

impl WeightInput {
    /// Unit weights for every frame.
    pub fn uniform(frames: usize) -> Self {
        Self::Shared(vec![1.0; frames])
    }

    /// A single-column matrix becomes [`WeightInput::Shared`].
    pub fn from_matrix(m: DMatrix<f64>) -> Self {
        if m.ncols() == 1 {
            Self::Shared(m.as_slice().to_vec())
        } else {
            Self::PerVoxel(m)
        }
    }

    fn column(&self, voxel: usize, frames: usize) -> &[f64] {
        match self {
            Self::Shared(w) => w,
            Self::PerVoxel(m) => &m.as_slice()[voxel * frames..(voxel + 1) * frames],
        }
    }

    fn check(&self, frames: usize, voxels: usize) -> Result<(), DriverError> {
        match self {
            Self::Shared(w) if w.len() == frames => Ok(()),
            Self::Shared(w) => Err(DriverError::Shape(format!(
                "shared weight column has {} entries for {frames} frames",
                w.len()
            ))),
            Self::PerVoxel(m) if m.nrows() == frames && m.ncols() == voxels => Ok(()),
            Self::PerVoxel(m) => Err(DriverError::Shape(format!(
                "weights are {}x{}; expected {frames}x1 or {frames}x{voxels}",
                m.nrows(),
                m.ncols()
            ))),
        }
    }
}

/// Everything the batch needs besides the shared context.
#[derive(Debug, Clone)]
pub struct BatchInput {
    /// Frames x voxels.
    pub tac: DMatrix<f64>,
    pub weights: WeightInput,
    /// Params x 1 (shared), params x voxels, or 1 x params (shared, warned).
    pub initial: DMatrix<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub sensitive: Vec<bool>,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Worker count; `None` uses the available parallelism.
    pub threads: Option<usize>,
    pub lm: LmConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub workers: usize,
    pub outcomes: OutcomeCounts,
    pub warnings: Vec<InputWarning>,
    /// Weighted RSS per voxel at the fitted parameters.
    pub wrss: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Params x voxels.
    pub params: DMatrix<f64>,
    /// Frames x voxels.
    pub curves: DMatrix<f64>,
    pub report: BatchReport,
}

/// How the initial-parameter input maps onto voxels.
enum Initial<'a> {
    Shared(&'a [f64]),
    PerVoxel(&'a [f64]),
}

fn resolve_initial<'a>(
    m: &'a DMatrix<f64>,
    params: usize,
    voxels: usize,
    warnings: &mut Vec<InputWarning>,
) -> Result<Initial<'a>, DriverError> {
    match (m.nrows(), m.ncols()) {
        (r, 1) if r == params => Ok(Initial::Shared(m.as_slice())),
        (r, c) if r == params && c == voxels => Ok(Initial::PerVoxel(m.as_slice())),
        (1, c) if c == params => {
            let w = InputWarning::SingleRowInitial { params };
            warn!("{w}");
            warnings.push(w);
            Ok(Initial::Shared(m.as_slice()))
        }
        (r, c) => Err(DriverError::Shape(format!(
            "initial parameters are {r}x{c}; expected {params}x1 or {params}x{voxels}"
        ))),
    }
}

fn check_len<T>(what: &str, v: &[T], expected: usize) -> Result<(), DriverError> {
    if v.len() == expected {
        Ok(())
    } else {
        Err(DriverError::Shape(format!(
            "{what} has {} entries; expected {expected}",
            v.len()
        )))
    }
}

fn check_model(ctx: &KineticContext) -> Result<usize, DriverError> {
    match ctx.num_params() {
        0 => Err(DriverError::Shape(format!(
            "{} model has no parameters",
            ctx.model().kind().display_name()
        ))),
        p => Ok(p),
    }
}

/// Fit every voxel of `input` against `ctx`.
///
/// Non-convergence is reported in the outcome counts, never as an error.
pub fn fit_all(
    ctx: &KineticContext,
    input: &BatchInput,
    opts: &DriverOptions,
) -> Result<BatchOutput, DriverError> {
    let f = ctx.num_frames();
    let p = check_model(ctx)?;
    let v = input.tac.ncols();

    if input.tac.nrows() != f {
        return Err(DriverError::Shape(format!(
            "TAC matrix has {} rows for {f} frames",
            input.tac.nrows()
        )));
    }
    input.weights.check(f, v)?;
    check_len("lower bounds", &input.lower, p)?;
    check_len("upper bounds", &input.upper, p)?;
    check_len("sensitivity mask", &input.sensitive, p)?;

    let mut warnings = Vec::new();
    let initial = resolve_initial(&input.initial, p, v, &mut warnings)?;

    let mut params = match initial {
        Initial::Shared(col) => DMatrix::from_fn(p, v, |r, _| col[r]),
        Initial::PerVoxel(all) => DMatrix::from_column_slice(p, v, all),
    };
    let mut curves = DMatrix::zeros(f, v);
    let mut wrss = vec![0.0; v];

    let pool = ThreadPoolBuilder::new()
        .num_threads(opts.threads.unwrap_or(0))
        .build()
        .map_err(|e| DriverError::ThreadPool(e.to_string()))?;
    let workers = pool.current_num_threads();
    info!(
        "fitting {v} voxels ({}, {f} frames) on {workers} workers",
        ctx.model().kind().display_name()
    );

    let mut outcomes = OutcomeCounts::default();
    if v > 0 {
        let chunk = v.div_ceil(workers).max(1);
        outcomes = pool.install(|| {
            params
                .as_mut_slice()
                .par_chunks_mut(p * chunk)
                .zip(curves.as_mut_slice().par_chunks_mut(f * chunk))
                .zip(wrss.par_chunks_mut(chunk))
                .enumerate()
                .map(|(worker, ((pc, cc), rc))| {
                    let part = Partition {
                        worker,
                        first: worker * chunk,
                        params: pc,
                        curves: cc,
                        wrss: rc,
                    };
                    fit_partition(ctx, input, &opts.lm, part)
                })
                .try_reduce(OutcomeCounts::default, |mut a, b| {
                    a.merge(&b);
                    Ok(a)
                })
        })?;
    }

    info!(
        "batch done: {} converged, {} at iteration limit, {} at damping limit",
        outcomes.converged, outcomes.iteration_limit, outcomes.damping_limit
    );

    Ok(BatchOutput {
        params,
        curves,
        report: BatchReport {
            workers,
            outcomes,
            warnings,
            wrss,
        },
    })
}

/// One worker's share of the output columns.
struct Partition<'a> {
    worker: usize,
    first: usize,
    params: &'a mut [f64],
    curves: &'a mut [f64],
    wrss: &'a mut [f64],
}

fn fit_partition(
    ctx: &KineticContext,
    input: &BatchInput,
    lm: &LmConfig,
    part: Partition<'_>,
) -> Result<OutcomeCounts, DriverError> {
    let f = ctx.num_frames();
    let p = ctx.num_params();
    let mut ws = LmWorkspace::new(f, p).map_err(|source| DriverError::ScratchAllocation {
        worker: part.worker,
        source,
    })?;

    let tac = input.tac.as_slice();
    let mut counts = OutcomeCounts::default();
    let voxels = part
        .params
        .chunks_mut(p)
        .zip(part.curves.chunks_mut(f))
        .zip(part.wrss.iter_mut());
    for (i, ((params, curve), wrss)) in voxels.enumerate() {
        let voxel = part.first + i;
        let problem = FitProblem {
            tac: &tac[voxel * f..(voxel + 1) * f],
            weights: input.weights.column(voxel, f),
            lower: &input.lower,
            upper: &input.upper,
            sensitive: &input.sensitive,
            max_iterations: input.max_iterations,
        };
        let report = fit_voxel(ctx, &problem, lm, &mut ws, params, curve);
        *wrss = report.rss;
        counts.record(report.termination);
    }
    debug!("worker {} fitted {} voxels", part.worker, counts.total());
    Ok(counts)
}

/// Model TACs (frames x voxels) for a params x voxels matrix.
pub fn evaluate_all(ctx: &KineticContext, params: &DMatrix<f64>) -> Result<DMatrix<f64>, DriverError> {
    let f = ctx.num_frames();
    let p = check_model(ctx)?;
    if params.nrows() != p {
        return Err(DriverError::Shape(format!(
            "parameter matrix has {} rows; {} expects {p}",
            params.nrows(),
            ctx.model().kind().display_name()
        )));
    }
    let mut curves = DMatrix::zeros(f, params.ncols());
    curves
        .as_mut_slice()
        .par_chunks_mut(f)
        .zip(params.as_slice().par_chunks(p))
        .for_each(|(curve, col)| ctx.tac(col, curve));
    Ok(curves)
}

/// TAC and Jacobian (frames x params, every parameter sensitive) at one
/// parameter vector.
pub fn jacobian_at(ctx: &KineticContext, params: &[f64]) -> Result<(Vec<f64>, DMatrix<f64>), DriverError> {
    let p = ctx.num_params();
    check_len("parameter vector", params, p)?;
    let mut curve = vec![0.0; ctx.num_frames()];
    let mut jac = DMatrix::zeros(ctx.num_frames(), p);
    ctx.tac_jacobian(params, &vec![true; p], &mut curve, &mut jac);
    Ok((curve, jac))
}
