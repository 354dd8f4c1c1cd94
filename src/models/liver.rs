//! Dual-input liver model.
//!
//! The liver receives blood from the hepatic artery (measured plasma `Ca`)
//! and the portal vein. The portal curve is not measured; it is modelled as
//! the arterial curve passed through a single exponential compartment:
//!
//! ```text
//! Cpv(t)  = ka e^{-ka t} ⊗ Ca(t)
//! Cin(t)  = fa Ca(t) + (1 - fa) Cpv(t)
//! C_T(t)  = K1 [A1 e^{-a1 t} + A2 e^{-a2 t}] ⊗ Cin(t)
//! C(t)    = (1 - vb) C_T(t - t0) + vb Bl(t - t0)
//! ```
//!
//! `Bl` mixes whole blood the same way as `Cin` mixes plasma. `t0` delays the
//! whole response relative to the sampled input.

use nalgebra::DMatrix;

use crate::domain::ModelKind;
use crate::math::{convolve, ConvRequest, Convolution, Sampled, Trace};
use crate::models::model::set_column;
use crate::models::two_tissue::Biexponential;
use crate::models::{KineticContext, KineticModel};

const K1: usize = 0;
const K2: usize = 1;
const K3: usize = 2;
const K4: usize = 3;
const VB: usize = 4;
const FA: usize = 5;
const KA: usize = 6;
const T0: usize = 7;

/// Portal-vein curve on the input grid, with its `ka` derivative.
struct Portal {
    curve: Sampled,
    d_ka: Option<Sampled>,
}

impl Portal {
    fn new(input: &Sampled, ka: f64, decay: f64, with_derivative: bool) -> Self {
        let req = ConvRequest {
            derivative: with_derivative,
            grid: true,
        };
        let conv = convolve(input, ka + decay, &[], req);
        let step = input.step();
        let g = conv.grid.unwrap_or_default();
        let curve = Sampled::new(step, g.iter().map(|v| ka * v).collect());
        // d(ka g)/d ka = g + ka dg
        let d_ka = conv
            .d_grid
            .map(|dg| Sampled::new(step, g.iter().zip(&dg).map(|(v, d)| v + ka * d).collect()));
        Self { curve, d_ka }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Liver;

impl Liver {
    fn evaluate(
        &self,
        ctx: &KineticContext,
        params: &[f64],
        sensitive: Option<&[bool]>,
        out: &mut [f64],
        jac: Option<&mut DMatrix<f64>>,
    ) {
        let (k1, vb, fa, ka, t0) = (params[K1], params[VB], params[FA], params[KA], params[T0]);
        let dk = ctx.decay();
        let frames = ctx.frames();
        let knots = frames.shifted_knots(t0);
        let n = knots.len();
        let need = |k: usize| sensitive.is_some_and(|s| s[k]);

        let bi = Biexponential::new(params[K2], params[K3], params[K4]);
        let portal = Portal::new(ctx.plasma(), ka, dk, need(KA));
        let portal_wb = Portal::new(ctx.whole_blood(), ka, dk, need(KA));

        let req = ConvRequest {
            derivative: need(K2) || need(K3) || need(K4),
            grid: false,
        };
        let arterial: [Convolution; 2] =
            [0, 1].map(|i| convolve(ctx.plasma(), bi.alpha[i] + dk, &knots, req));
        let portal_conv: [Convolution; 2] =
            [0, 1].map(|i| convolve(&portal.curve, bi.alpha[i] + dk, &knots, req));

        // Tissue response per unit K1.
        let mut unit = Trace::zeros(n);
        for i in 0..2 {
            unit.add_scaled(bi.amp[i] * fa, &arterial[i].trace);
            unit.add_scaled(bi.amp[i] * (1.0 - fa), &portal_conv[i].trace);
        }
        let wb = ctx.whole_blood().trace(&knots);
        let pwb = portal_wb.curve.trace(&knots);
        let mut blood = wb.scaled(fa);
        blood.add_scaled(1.0 - fa, &pwb);

        let mut total = unit.scaled((1.0 - vb) * k1);
        total.add_scaled(vb, &blood);
        frames.average(&total, dk, t0, out);

        let Some(jac) = jac else {
            return;
        };
        jac.fill(0.0);
        let mut col = vec![0.0; out.len()];
        let tissue_scale = (1.0 - vb) * k1;

        if need(K1) {
            frames.average(&unit.scaled(1.0 - vb), dk, t0, &mut col);
            set_column(jac, K1, &col);
        }
        for (j, k) in [K2, K3, K4].into_iter().enumerate() {
            if !need(k) {
                continue;
            }
            let mut t = Trace::zeros(n);
            for i in 0..2 {
                t.add_scaled(bi.d_amp[i][j] * fa, &arterial[i].trace);
                t.add_scaled(bi.d_amp[i][j] * (1.0 - fa), &portal_conv[i].trace);
                let rate = bi.amp[i] * bi.d_alpha[i][j];
                if let Some(d) = &arterial[i].d_rate {
                    t.add_scaled(rate * fa, d);
                }
                if let Some(d) = &portal_conv[i].d_rate {
                    t.add_scaled(rate * (1.0 - fa), d);
                }
            }
            frames.average(&t.scaled(tissue_scale), dk, t0, &mut col);
            set_column(jac, k, &col);
        }
        if need(VB) {
            let mut t = blood.clone();
            t.add_scaled(-k1, &unit);
            frames.average(&t, dk, t0, &mut col);
            set_column(jac, VB, &col);
        }
        if need(FA) {
            let mut t = Trace::zeros(n);
            for i in 0..2 {
                t.add_scaled(tissue_scale * bi.amp[i], &arterial[i].trace);
                t.add_scaled(-tissue_scale * bi.amp[i], &portal_conv[i].trace);
            }
            t.add_scaled(vb, &wb);
            t.add_scaled(-vb, &pwb);
            frames.average(&t, dk, t0, &mut col);
            set_column(jac, FA, &col);
        }
        if let (Some(dp), Some(dpwb)) = (&portal.d_ka, &portal_wb.d_ka) {
            let mut t = Trace::zeros(n);
            for i in 0..2 {
                let c = convolve(dp, bi.alpha[i] + dk, &knots, ConvRequest::default());
                t.add_scaled(tissue_scale * bi.amp[i] * (1.0 - fa), &c.trace);
            }
            t.add_scaled(vb * (1.0 - fa), &dpwb.trace(&knots));
            frames.average(&t, dk, t0, &mut col);
            set_column(jac, KA, &col);
        }
        if need(T0) {
            frames.delay_slope(&total, out, dk, t0, &mut col);
            set_column(jac, T0, &col);
        }
    }
}

impl KineticModel for Liver {
    fn kind(&self) -> ModelKind {
        ModelKind::Liver
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{assert_jacobian_matches, fdg_context, default_params};
    use approx::assert_relative_eq;

    #[test]
    fn jacobian_matches_finite_differences() {
        let ctx = fdg_context(ModelKind::Liver, 0.0);
        assert_jacobian_matches(&ctx, &default_params(ModelKind::Liver), 1e-4);
        let ctx = fdg_context(ModelKind::Liver, 0.0063);
        assert_jacobian_matches(&ctx, &[0.9, 1.1, 0.01, 0.005, 0.1, 0.3, 2.0, 0.15], 1e-4);
    }

    #[test]
    fn insensitive_columns_are_zero() {
        let ctx = fdg_context(ModelKind::Liver, 0.0063);
        let params = default_params(ModelKind::Liver);
        let mask = [true, false, true, false, false, true, false, true];
        let mut out = vec![0.0; ctx.num_frames()];
        let mut jac = DMatrix::from_element(ctx.num_frames(), 8, f64::NAN);
        ctx.tac_jacobian(&params, &mask, &mut out, &mut jac);
        for (k, &on) in mask.iter().enumerate() {
            if !on {
                assert!(jac.column(k).iter().all(|&v| v == 0.0), "column {k}");
            } else {
                assert!(jac.column(k).iter().any(|&v| v != 0.0), "column {k}");
            }
        }
    }

    #[test]
    fn arterial_only_matches_two_tissue() {
        // fa = 1, t0 = 0: the portal branch drops out.
        let liver = fdg_context(ModelKind::Liver, 0.0063);
        let two = fdg_context(ModelKind::TwoTissue, 0.0063);
        let mut a = vec![0.0; liver.num_frames()];
        let mut b = vec![0.0; two.num_frames()];
        liver.tac(&[0.6, 0.9, 0.1, 0.02, 0.05, 1.0, 3.0, 0.0], &mut a);
        two.tac(&[0.6, 0.9, 0.1, 0.02, 0.05], &mut b);
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x, y, max_relative = 1e-12, epsilon = 1e-14);
        }
    }

    #[test]
    fn tac_and_jacobian_paths_agree() {
        let ctx = fdg_context(ModelKind::Liver, 0.0063);
        let params = default_params(ModelKind::Liver);
        let mut a = vec![0.0; ctx.num_frames()];
        let mut b = vec![0.0; ctx.num_frames()];
        let mut jac = DMatrix::zeros(ctx.num_frames(), 8);
        ctx.tac(&params, &mut a);
        ctx.tac_jacobian(&params, &[true; 8], &mut b, &mut jac);
        assert_eq!(a, b);
    }
}
