//! Bounded Levenberg-Marquardt for a single voxel.
//!
//! Each accepted step re-linearizes the model at the committed point and
//! solves the damped normal equations
//!
//! ```text
//! (JᵀWJ + λ D) δ = JᵀW r,    D = diag(max(H_kk, floor))
//! ```
//!
//! with the bounded coordinate-descent solver, so steps respect the box and
//! never touch fixed parameters. Rejected steps raise λ and retry with the
//! same Jacobian.
//!
//! None of the terminal states is an error; every run leaves the best
//! parameters found in the caller's buffer.

use std::collections::TryReserveError;

use nalgebra::{DMatrix, DVector};

use crate::domain::Termination;
use crate::math::{solve_box_qp, CoordConfig};
use crate::models::KineticContext;

/// Tunable constants of the optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct LmConfig {
    pub initial_lambda: f64,
    /// Factor applied to λ after a rejected step.
    pub lambda_up: f64,
    /// Divisor applied to λ after an accepted step.
    pub lambda_down: f64,
    pub lambda_min: f64,
    /// Rejecting beyond this damping ends the run.
    pub lambda_max: f64,
    /// Converged when an accepted step lowers the RSS by at most this
    /// fraction.
    pub rss_tolerance: f64,
    /// Converged when no parameter moves by more than this fraction.
    pub step_tolerance: f64,
    /// Damping diagonal floor, relative to the largest `H_kk`.
    pub damping_floor: f64,
    pub coord: CoordConfig,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            initial_lambda: 1e-2,
            lambda_up: 10.0,
            lambda_down: 10.0,
            lambda_min: 1e-12,
            lambda_max: 1e12,
            rss_tolerance: 1e-10,
            step_tolerance: 1e-10,
            damping_floor: 1e-12,
            coord: CoordConfig::default(),
        }
    }
}

/// One voxel's data and constraints.
#[derive(Debug, Clone, Copy)]
pub struct FitProblem<'a> {
    pub tac: &'a [f64],
    pub weights: &'a [f64],
    pub lower: &'a [f64],
    pub upper: &'a [f64],
    pub sensitive: &'a [bool],
    /// Cap on accepted steps.
    pub max_iterations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmReport {
    pub termination: Termination,
    /// Accepted steps.
    pub iterations: usize,
    pub initial_rss: f64,
    /// Weighted RSS at the returned parameters.
    pub rss: f64,
}

/// Scratch state reused across every voxel a worker fits.
#[derive(Debug, Clone)]
pub struct LmWorkspace {
    jac: DMatrix<f64>,
    wjac: DMatrix<f64>,
    hess: DMatrix<f64>,
    damped: DMatrix<f64>,
    grad: DVector<f64>,
    residual: DVector<f64>,
    curve: Vec<f64>,
    trial_curve: Vec<f64>,
    step: Vec<f64>,
    trial: Vec<f64>,
}

fn buffer(len: usize) -> Result<Vec<f64>, TryReserveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, 0.0);
    Ok(v)
}

impl LmWorkspace {
    /// Allocate buffers for `frames` x `params` problems.
    pub fn new(frames: usize, params: usize) -> Result<Self, TryReserveError> {
        // Saturate so an overflowing size fails the reservation instead of wrapping.
        let cells = frames.saturating_mul(params);
        let square = params.saturating_mul(params);
        Ok(Self {
            jac: DMatrix::from_vec(frames, params, buffer(cells)?),
            wjac: DMatrix::from_vec(frames, params, buffer(cells)?),
            hess: DMatrix::from_vec(params, params, buffer(square)?),
            damped: DMatrix::from_vec(params, params, buffer(square)?),
            grad: DVector::from_vec(buffer(params)?),
            residual: DVector::from_vec(buffer(frames)?),
            curve: buffer(frames)?,
            trial_curve: buffer(frames)?,
            step: buffer(params)?,
            trial: buffer(params)?,
        })
    }

    pub fn frames(&self) -> usize {
        self.jac.nrows()
    }

    pub fn params(&self) -> usize {
        self.jac.ncols()
    }

    /// `H = JᵀWJ` and `g = JᵀW r` at the point whose curve is in `self.curve`.
    fn normal_equations(&mut self, tac: &[f64], weights: &[f64]) {
        for f in 0..self.frames() {
            self.residual[f] = tac[f] - self.curve[f];
            for k in 0..self.params() {
                self.wjac[(f, k)] = weights[f] * self.jac[(f, k)];
            }
        }
        self.hess.gemm_tr(1.0, &self.wjac, &self.jac, 0.0);
        self.grad.gemv_tr(1.0, &self.wjac, &self.residual, 0.0);
    }

    fn damp(&mut self, lambda: f64, floor: f64) {
        self.damped.copy_from(&self.hess);
        for k in 0..self.params() {
            self.damped[(k, k)] += lambda * self.hess[(k, k)].max(floor);
        }
    }
}

/// `Σ w_f (y_f - c_f)²`.
pub fn weighted_rss(tac: &[f64], weights: &[f64], curve: &[f64]) -> f64 {
    tac.iter()
        .zip(weights)
        .zip(curve)
        .map(|((y, w), c)| w * (y - c) * (y - c))
        .sum()
}

enum Proposal {
    Accepted(f64),
    Stalled,
    DampingLimit,
}

/// Fit one voxel.
///
/// `params` holds the initial parameters on entry and the fitted ones on
/// return; `curve` receives the model at the returned parameters. Caller
/// contract: `lower <= params <= upper`.
pub fn fit_voxel(
    ctx: &KineticContext,
    problem: &FitProblem<'_>,
    cfg: &LmConfig,
    ws: &mut LmWorkspace,
    params: &mut [f64],
    curve: &mut [f64],
) -> LmReport {
    debug_assert_eq!(ws.frames(), ctx.num_frames());
    debug_assert_eq!(ws.params(), params.len());

    let sensitive = problem.sensitive;
    let any_free = sensitive.iter().any(|&s| s);

    ctx.tac(params, &mut ws.curve);
    let initial_rss = weighted_rss(problem.tac, problem.weights, &ws.curve);
    let mut rss = initial_rss;
    let mut lambda = cfg.initial_lambda;
    let mut iterations = 0;

    let termination = loop {
        if !any_free || rss == 0.0 {
            break Termination::Converged;
        }
        if iterations >= problem.max_iterations {
            break Termination::IterationLimit;
        }

        ctx.tac_jacobian(params, sensitive, &mut ws.curve, &mut ws.jac);
        ws.normal_equations(problem.tac, problem.weights);
        let max_diag = (0..ws.params())
            .map(|k| ws.hess[(k, k)])
            .filter(|v| v.is_finite())
            .fold(0.0_f64, f64::max);
        let floor = cfg.damping_floor * max_diag.max(f64::MIN_POSITIVE);

        let proposal = loop {
            ws.damp(lambda, floor);
            solve_box_qp(
                &ws.damped,
                &ws.grad,
                params,
                problem.lower,
                problem.upper,
                sensitive,
                &cfg.coord,
                &mut ws.step,
            );
            if ws.step.iter().all(|&d| d == 0.0) {
                break Proposal::Stalled;
            }

            ws.trial.copy_from_slice(params);
            for k in 0..params.len() {
                if sensitive[k] {
                    ws.trial[k] = (params[k] + ws.step[k]).max(problem.lower[k]).min(problem.upper[k]);
                }
            }
            ctx.tac(&ws.trial, &mut ws.trial_curve);
            let trial_rss = weighted_rss(problem.tac, problem.weights, &ws.trial_curve);
            if trial_rss < rss {
                break Proposal::Accepted(trial_rss);
            }

            lambda *= cfg.lambda_up;
            if lambda > cfg.lambda_max {
                break Proposal::DampingLimit;
            }
        };

        match proposal {
            Proposal::Stalled => break Termination::Converged,
            Proposal::DampingLimit => break Termination::DampingLimit,
            Proposal::Accepted(trial_rss) => {
                let mut rel_step = 0.0_f64;
                for k in 0..params.len() {
                    if sensitive[k] {
                        let moved = (ws.trial[k] - params[k]).abs();
                        rel_step = rel_step.max(moved / params[k].abs().max(f64::EPSILON));
                        params[k] = ws.trial[k];
                    }
                }
                let rel_decrease = (rss - trial_rss) / rss;
                rss = trial_rss;
                iterations += 1;
                lambda = (lambda / cfg.lambda_down).max(cfg.lambda_min);

                if rel_decrease <= cfg.rss_tolerance || rel_step <= cfg.step_tolerance {
                    break Termination::Converged;
                }
            }
        }
    };

    ctx.tac(params, curve);
    LmReport {
        termination,
        iterations,
        initial_rss,
        rss,
    }
}
