//! Two-tissue compartment model with a vascular fraction.
//!
//! The impulse response of the reversible two-tissue system is a sum of two
//! exponentials:
//!
//! ```text
//! C_T(t) = K1 [A1 e^{-a1 t} + A2 e^{-a2 t}] ⊗ Cp(t)
//! a1,2   = (S ∓ D) / 2,   S = k2 + k3 + k4,   D = sqrt(S² - 4 k2 k4)
//! A1     = (k3 + k4 - a1) / D,   A2 = 1 - A1
//! C(t)   = (1 - vb) C_T(t) + vb Cwb(t)
//! ```
//!
//! Numerical notes:
//! - `a1` is computed as `2 k2 k4 / (S + D)` to avoid cancellation when
//!   `k2 k4` is small.
//! - With `c = k3 + k4 - k2` the gap is `D² = c² + 4 k2 k3` and
//!   `A1 = (1 + c / D) / 2`. Both forms are free of cancellation near the
//!   degenerate point `k3 = 0, k2 = k4`, and so is
//!   `dA1 = (2 k2 k3 dc - c d(k2 k3)) / D³`.
//! - `D` vanishes only when `k3 = 0` and `k2 = k4`; it is floored so the
//!   amplitudes stay finite.

use nalgebra::DMatrix;

use crate::domain::ModelKind;
use crate::math::{convolve, ConvRequest, Trace};
use crate::models::model::set_column;
use crate::models::{KineticContext, KineticModel};

const K1: usize = 0;
const K2: usize = 1;
const K3: usize = 2;
const K4: usize = 3;
const VB: usize = 4;

/// Lower bound on the eigenvalue gap `D`.
const GAP_FLOOR: f64 = 1e-9;

/// Exponents and amplitudes of the two-tissue impulse response, with
/// derivatives with respect to `(k2, k3, k4)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Biexponential {
    pub alpha: [f64; 2],
    pub amp: [f64; 2],
    pub d_alpha: [[f64; 3]; 2],
    pub d_amp: [[f64; 3]; 2],
}

impl Biexponential {
    pub fn new(k2: f64, k3: f64, k4: f64) -> Self {
        let s = k2 + k3 + k4;
        let p = k2 * k4;
        let c = k3 + k4 - k2;
        let q = k2 * k3;
        let d = (c * c + 4.0 * q).max(0.0).sqrt().max(GAP_FLOOR);
        let a1 = if s + d > 0.0 { 2.0 * p / (s + d) } else { 0.5 * (s - d) };
        let a2 = s - a1;
        let amp1 = 0.5 * (1.0 + c / d);

        let ds = [1.0, 1.0, 1.0];
        let dc = [-1.0, 1.0, 1.0];
        let dq = [k3, k2, 0.0];
        let d3 = d * d * d;

        let mut d_alpha = [[0.0; 3]; 2];
        let mut d_amp = [[0.0; 3]; 2];
        for j in 0..3 {
            let dd = (c * dc[j] + 2.0 * dq[j]) / d;
            let da1 = 0.5 * (ds[j] - dd);
            let da2 = 0.5 * (ds[j] + dd);
            let damp1 = (2.0 * q * dc[j] - c * dq[j]) / d3;
            d_alpha[0][j] = da1;
            d_alpha[1][j] = da2;
            d_amp[0][j] = damp1;
            d_amp[1][j] = -damp1;
        }

        Self {
            alpha: [a1, a2],
            amp: [amp1, 1.0 - amp1],
            d_alpha,
            d_amp,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TwoTissue;

impl TwoTissue {
    fn evaluate(
        &self,
        ctx: &KineticContext,
        params: &[f64],
        sensitive: Option<&[bool]>,
        out: &mut [f64],
        jac: Option<&mut DMatrix<f64>>,
    ) {
        let (k1, vb) = (params[K1], params[VB]);
        let frames = ctx.frames();
        let dk = ctx.decay();
        let knots = frames.knots();
        let need = |k: usize| sensitive.is_some_and(|s| s[k]);

        let bi = Biexponential::new(params[K2], params[K3], params[K4]);
        let req = ConvRequest {
            derivative: need(K2) || need(K3) || need(K4),
            grid: false,
        };
        let convs = [0, 1].map(|i| convolve(ctx.plasma(), bi.alpha[i] + dk, knots, req));

        // Tissue response per unit K1.
        let mut unit = Trace::zeros(knots.len());
        for (i, c) in convs.iter().enumerate() {
            unit.add_scaled(bi.amp[i], &c.trace);
        }
        let blood = ctx.whole_blood().trace(knots);

        let mut total = unit.scaled((1.0 - vb) * k1);
        total.add_scaled(vb, &blood);
        frames.average(&total, dk, 0.0, out);

        let Some(jac) = jac else {
            return;
        };
        jac.fill(0.0);
        let mut col = vec![0.0; out.len()];

        if need(K1) {
            frames.average(&unit.scaled(1.0 - vb), dk, 0.0, &mut col);
            set_column(jac, K1, &col);
        }
        for (j, k) in [K2, K3, K4].into_iter().enumerate() {
            if !need(k) {
                continue;
            }
            let mut t = Trace::zeros(knots.len());
            for (i, c) in convs.iter().enumerate() {
                t.add_scaled(bi.d_amp[i][j], &c.trace);
                if let Some(d) = &c.d_rate {
                    t.add_scaled(bi.amp[i] * bi.d_alpha[i][j], d);
                }
            }
            frames.average(&t.scaled((1.0 - vb) * k1), dk, 0.0, &mut col);
            set_column(jac, k, &col);
        }
        if need(VB) {
            let mut t = blood;
            t.add_scaled(-k1, &unit);
            frames.average(&t, dk, 0.0, &mut col);
            set_column(jac, VB, &col);
        }
    }
}

impl KineticModel for TwoTissue {
    fn kind(&self) -> ModelKind {
        ModelKind::TwoTissue
    }

    fn tac(&self, ctx: &KineticContext, params: &[f64], out: &mut [f64]) {
        self.evaluate(ctx, params, None, out, None);
    }

    fn tac_jacobian(
        &self,
        ctx: &KineticContext,
        params: &[f64],
        sensitive: &[bool],
        out: &mut [f64],
        jac: &mut DMatrix<f64>,
    ) {
        self.evaluate(ctx, params, Some(sensitive), out, Some(jac));
    }
}
