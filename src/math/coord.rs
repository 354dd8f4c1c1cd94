//! Bounded coordinate descent for the damped Gauss-Newton subproblem.
//!
//! Each Levenberg-Marquardt proposal solves
//!
//! ```text
//! minimize   δᵀ A δ - 2 bᵀ δ
//! subject to lower ≤ x + δ ≤ upper,   δ_k = 0 for fixed k
//! ```
//!
//! with `A = JᵀWJ + λ D` and `b = JᵀW r`. Projecting the unconstrained
//! solution onto the box is a poor approximation once a bound is active, so
//! we minimize one coordinate at a time in closed form and clamp, sweeping
//! until the step settles.
//!
//! Every coordinate update is an exact minimization of a convex 1-D quadratic
//! over an interval containing the current value, so the objective never
//! increases from `δ = 0`.

use nalgebra::{DMatrix, DVector};

/// Configuration for [`solve_box_qp`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoordConfig {
    /// Maximum number of full sweeps.
    pub max_sweeps: usize,
    /// Stop when the largest coordinate change in a sweep is below
    /// `tolerance * (1 + max |δ|)`.
    pub tolerance: f64,
    /// Diagonal entries at or below `pivot_floor * max A_kk` are degenerate.
    pub pivot_floor: f64,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            max_sweeps: 200,
            tolerance: 1e-12,
            pivot_floor: 1e-14,
        }
    }
}

/// How a coordinate-descent solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordReport {
    pub sweeps: usize,
    pub converged: bool,
}

/// Solve the box-constrained quadratic, writing the step into `delta`.
///
/// `x` is the current point; the box for `δ_k` is `[lower_k - x_k, upper_k - x_k]`.
/// Degenerate coordinates (tiny or non-finite pivot, non-finite update) keep a
/// zero step for the sweep.
pub fn solve_box_qp(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    x: &[f64],
    lower: &[f64],
    upper: &[f64],
    free: &[bool],
    cfg: &CoordConfig,
    delta: &mut [f64],
) -> CoordReport {
    let p = x.len();
    delta.fill(0.0);

    let max_diag = (0..p)
        .filter(|&k| free[k])
        .map(|k| a[(k, k)])
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    if max_diag <= 0.0 {
        return CoordReport {
            sweeps: 0,
            converged: true,
        };
    }
    let pivot_min = cfg.pivot_floor * max_diag;

    let mut sweeps = 0;
    let mut converged = false;
    while sweeps < cfg.max_sweeps {
        sweeps += 1;
        let mut max_change = 0.0_f64;

        for k in 0..p {
            if !free[k] {
                continue;
            }
            let akk = a[(k, k)];
            if !(akk > pivot_min) {
                continue;
            }

            let mut s = b[k];
            for j in 0..p {
                if j != k && free[j] {
                    s -= a[(k, j)] * delta[j];
                }
            }
            let target = s / akk;
            if !target.is_finite() {
                continue;
            }

            let lo = lower[k] - x[k];
            let hi = upper[k] - x[k];
            let next = target.max(lo).min(hi);
            max_change = max_change.max((next - delta[k]).abs());
            delta[k] = next;
        }

        let scale = delta.iter().fold(0.0_f64, |m, d| m.max(d.abs()));
        if max_change <= cfg.tolerance * (1.0 + scale) {
            converged = true;
            break;
        }
    }

    CoordReport { sweeps, converged }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    /// `δᵀ A δ - 2 bᵀ δ`.
    fn quadratic_objective(a: &DMatrix<f64>, b: &DVector<f64>, delta: &[f64]) -> f64 {
        let d = DVector::from_column_slice(delta);
        (d.transpose() * a * &d)[(0, 0)] - 2.0 * b.dot(&d)
    }

    fn psd(rng: &mut StdRng, n: usize) -> DMatrix<f64> {
        let m = DMatrix::from_fn(n + 2, n, |_, _| rng.gen_range(-1.0..1.0));
        m.transpose() * m
    }

    #[test]
    fn unconstrained_solution_matches_linear_solve() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_row_slice(&[1.0, 2.0]);
        let expected = a.clone().lu().solve(&b).unwrap();

        let mut delta = [0.0; 2];
        let report = solve_box_qp(
            &a,
            &b,
            &[0.0, 0.0],
            &[-10.0, -10.0],
            &[10.0, 10.0],
            &[true, true],
            &CoordConfig::default(),
            &mut delta,
        );
        assert!(report.converged);
        assert_relative_eq!(delta[0], expected[0], max_relative = 1e-9);
        assert_relative_eq!(delta[1], expected[1], max_relative = 1e-9);
    }

    #[test]
    fn active_bound_reoptimizes_remaining_coordinates() {
        // Unconstrained optimum is (2, -1); clamp δ0 <= 1 and re-optimize δ1.
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
        let b = a.clone() * DVector::from_row_slice(&[2.0, -1.0]);
        let mut delta = [0.0; 2];
        solve_box_qp(
            &a,
            &b,
            &[0.0, 0.0],
            &[-5.0, -5.0],
            &[1.0, 5.0],
            &[true, true],
            &CoordConfig::default(),
            &mut delta,
        );
        assert_relative_eq!(delta[0], 1.0);
        // δ1 = (b1 - A10 δ0) / A11 = (0.0 - 0.5) / 1.0
        assert_relative_eq!(delta[1], -0.5, max_relative = 1e-9);
    }

    #[test]
    fn random_problems_respect_box_and_decrease_objective() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.gen_range(1..6);
            let a = psd(&mut rng, n);
            let b = DVector::from_fn(n, |_, _| rng.gen_range(-3.0..3.0));
            let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let lower: Vec<f64> = x.iter().map(|v| v - rng.gen_range(0.0..0.5)).collect();
            let upper: Vec<f64> = x.iter().map(|v| v + rng.gen_range(0.0..0.5)).collect();
            let free: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.8)).collect();

            let mut delta = vec![0.0; n];
            solve_box_qp(&a, &b, &x, &lower, &upper, &free, &CoordConfig::default(), &mut delta);

            for k in 0..n {
                assert!(delta[k] >= lower[k] - x[k] && delta[k] <= upper[k] - x[k]);
                if !free[k] {
                    assert_eq!(delta[k], 0.0);
                }
            }
            assert!(quadratic_objective(&a, &b, &delta) <= 1e-12);
        }
    }

    #[test]
    fn degenerate_pivot_yields_zero_step() {
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 2.0]);
        let b = DVector::from_row_slice(&[5.0, 2.0]);
        let mut delta = [9.0; 2];
        solve_box_qp(
            &a,
            &b,
            &[0.0, 0.0],
            &[-10.0, -10.0],
            &[10.0, 10.0],
            &[true, true],
            &CoordConfig::default(),
            &mut delta,
        );
        assert_eq!(delta[0], 0.0);
        assert_relative_eq!(delta[1], 1.0);
    }

    #[test]
    fn all_zero_matrix_returns_zero_step() {
        let a = DMatrix::zeros(3, 3);
        let b = DVector::from_row_slice(&[1.0, 1.0, 1.0]);
        let mut delta = [1.0; 3];
        let report = solve_box_qp(
            &a,
            &b,
            &[0.0; 3],
            &[-1.0; 3],
            &[1.0; 3],
            &[true; 3],
            &CoordConfig::default(),
            &mut delta,
        );
        assert!(report.converged);
        assert_eq!(delta, [0.0; 3]);
    }
}
