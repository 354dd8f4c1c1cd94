//! Stable phi-functions for exact exponential integration.
//!
//! Kinetic kernels are advanced exactly between input breakpoints using
//!
//! - `φ0(z) = e^z`
//! - `φ1(z) = (e^z - 1) / z`
//! - `φ2(z) = (φ1(z) - 1) / z`
//! - `φ3(z) = (φ2(z) - 1/2) / z`
//!
//! together with their first derivatives in `z` (needed for analytic
//! Jacobians with respect to rate constants).
//!
//! Numerical notes:
//! - For small `|z|` the recurrences suffer from catastrophic cancellation.
//!   Below `SERIES_RADIUS` we evaluate the Taylor series
//!   `φn(z) = Σ_j z^j / (j + n)!` instead.
//! - `φ1` uses `expm1` outside the series region.
//! - At `z = 0` the limits are `φn = 1/n!` and `φn' = 1/(n+1)!`.

/// Radius below which the series expansion is used.
const SERIES_RADIUS: f64 = 0.5;

/// Series terms; `0.5^24 / 24!` is far below machine precision.
const SERIES_TERMS: usize = 24;

/// `φ0..φ3` and the derivatives of `φ1..φ3` at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phi {
    pub e: f64,
    pub p1: f64,
    pub p2: f64,
    pub p3: f64,
    pub d1: f64,
    pub d2: f64,
    pub d3: f64,
}

/// Evaluate all phi-functions (and derivatives) at `z`.
pub fn phi(z: f64) -> Phi {
    if z.abs() < SERIES_RADIUS {
        phi_series(z)
    } else {
        phi_closed(z)
    }
}

/// `φ1(z)` alone; used for decay-weighted frame lengths.
pub fn phi1(z: f64) -> f64 {
    if z.abs() < 1e-8 {
        // (e^z - 1) / z ≈ 1 + z/2 + z^2/6
        return 1.0 + z / 2.0 + z * z / 6.0;
    }
    z.exp_m1() / z
}

fn phi_series(z: f64) -> Phi {
    let mut p = [0.0_f64; 3];
    let mut d = [0.0_f64; 3];

    for n in 1..=3usize {
        // coef = 1 / (j + n)!
        let mut coef = 1.0 / factorial(n);
        let mut z_j = 1.0;
        let mut z_jm1 = 0.0;
        let mut sum = 0.0;
        let mut dsum = 0.0;
        for j in 0..SERIES_TERMS {
            sum += coef * z_j;
            dsum += j as f64 * coef * z_jm1;
            z_jm1 = z_j;
            z_j *= z;
            coef /= (j + n + 1) as f64;
        }
        p[n - 1] = sum;
        d[n - 1] = dsum;
    }

    Phi {
        e: z.exp(),
        p1: p[0],
        p2: p[1],
        p3: p[2],
        d1: d[0],
        d2: d[1],
        d3: d[2],
    }
}

fn phi_closed(z: f64) -> Phi {
    let e = z.exp();
    let p1 = z.exp_m1() / z;
    let p2 = (p1 - 1.0) / z;
    let p3 = (p2 - 0.5) / z;
    // φn' = (φ(n-1)' - φn) / z, with φ0' = e^z.
    let d1 = (e - p1) / z;
    let d2 = (d1 - p2) / z;
    let d3 = (d2 - p3) / z;
    Phi {
        e,
        p1,
        p2,
        p3,
        d1,
        d2,
        d3,
    }
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn limits_at_zero() {
        let v = phi(0.0);
        assert_relative_eq!(v.e, 1.0);
        assert_relative_eq!(v.p1, 1.0);
        assert_relative_eq!(v.p2, 0.5);
        assert_relative_eq!(v.p3, 1.0 / 6.0);
        assert_relative_eq!(v.d1, 0.5);
        assert_relative_eq!(v.d2, 1.0 / 6.0);
        assert_relative_eq!(v.d3, 1.0 / 24.0);
    }

    #[test]
    fn series_and_closed_forms_agree_at_the_switch() {
        for &z in &[-SERIES_RADIUS, SERIES_RADIUS, -0.7, 0.7] {
            let a = phi_series(z);
            let b = phi_closed(z);
            assert_relative_eq!(a.p1, b.p1, max_relative = 1e-13);
            assert_relative_eq!(a.p2, b.p2, max_relative = 1e-13);
            assert_relative_eq!(a.p3, b.p3, max_relative = 1e-12);
            assert_relative_eq!(a.d1, b.d1, max_relative = 1e-12);
            assert_relative_eq!(a.d2, b.d2, max_relative = 1e-11);
            assert_relative_eq!(a.d3, b.d3, max_relative = 1e-10);
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let h = 1e-6;
        for &z in &[-30.0, -3.0, -0.6, -0.2, 0.0, 0.3, 1.5] {
            let v = phi(z);
            let lo = phi(z - h);
            let hi = phi(z + h);
            assert_relative_eq!(v.d1, (hi.p1 - lo.p1) / (2.0 * h), max_relative = 1e-6);
            assert_relative_eq!(v.d2, (hi.p2 - lo.p2) / (2.0 * h), max_relative = 1e-6);
            assert_relative_eq!(v.d3, (hi.p3 - lo.p3) / (2.0 * h), max_relative = 1e-5);
        }
    }

    #[test]
    fn finite_for_stiff_arguments() {
        for &z in &[-1e6, -1e3, -50.0] {
            let v = phi(z);
            for x in [v.e, v.p1, v.p2, v.p3, v.d1, v.d2, v.d3] {
                assert!(x.is_finite(), "phi({z}) produced {x}");
            }
        }
    }

    #[test]
    fn phi1_matches_full_evaluation() {
        for &z in &[-2.0, -1e-9, 0.0, 1e-3, 0.8] {
            assert_relative_eq!(phi1(z), phi(z).p1, max_relative = 1e-12);
        }
    }
}
