//! One-tissue compartment model.
//!
//! ```text
//! C_T(t) = K1 e^{-k2 t} ⊗ Cp(t)
//! ```

use nalgebra::DMatrix;

use crate::domain::ModelKind;
use crate::math::{convolve, ConvRequest};
use crate::models::model::set_column;
use crate::models::{KineticContext, KineticModel};

const K1: usize = 0;
const K2: usize = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct OneTissue;

impl KineticModel for OneTissue {
    fn kind(&self) -> ModelKind {
        ModelKind::OneTissue
    }

    fn tac(&self, ctx: &KineticContext, params: &[f64], out: &mut [f64]) {
        let frames = ctx.frames();
        let conv = convolve(
            ctx.plasma(),
            params[K2] + ctx.decay(),
            frames.knots(),
            ConvRequest::default(),
        );
        frames.average(&conv.trace, ctx.decay(), 0.0, out);
        for v in out.iter_mut() {
            *v *= params[K1];
        }
    }

    fn tac_jacobian(
        &self,
        ctx: &KineticContext,
        params: &[f64],
        sensitive: &[bool],
        out: &mut [f64],
        jac: &mut DMatrix<f64>,
    ) {
        let frames = ctx.frames();
        let req = ConvRequest {
            derivative: sensitive[K2],
            grid: false,
        };
        let conv = convolve(ctx.plasma(), params[K2] + ctx.decay(), frames.knots(), req);

        // Unit-K1 response.
        let mut unit = vec![0.0; out.len()];
        frames.average(&conv.trace, ctx.decay(), 0.0, &mut unit);
        for (o, u) in out.iter_mut().zip(&unit) {
            *o = params[K1] * u;
        }

        jac.fill(0.0);
        if sensitive[K1] {
            set_column(jac, K1, &unit);
        }
        if let Some(d) = &conv.d_rate {
            let mut col = vec![0.0; out.len()];
            frames.average(d, ctx.decay(), 0.0, &mut col);
            for v in col.iter_mut() {
                *v *= params[K1];
            }
            set_column(jac, K2, &col);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{assert_jacobian_matches, fdg_context};
    use approx::assert_relative_eq;

    #[test]
    fn jacobian_matches_finite_differences() {
        let ctx = fdg_context(ModelKind::OneTissue, 0.0);
        assert_jacobian_matches(&ctx, &[0.5, 0.3], 1e-4);
        let ctx = fdg_context(ModelKind::OneTissue, 0.0063);
        assert_jacobian_matches(&ctx, &[0.12, 0.05], 1e-4);
    }

    #[test]
    fn tac_is_linear_in_k1() {
        let ctx = fdg_context(ModelKind::OneTissue, 0.0);
        let mut a = vec![0.0; ctx.num_frames()];
        let mut b = vec![0.0; ctx.num_frames()];
        ctx.tac(&[0.2, 0.3], &mut a);
        ctx.tac(&[0.6, 0.3], &mut b);
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(3.0 * x, *y, max_relative = 1e-12);
        }
    }

    #[test]
    fn zero_clearance_stays_finite() {
        let ctx = fdg_context(ModelKind::OneTissue, 0.0);
        let mut out = vec![0.0; ctx.num_frames()];
        let mut jac = DMatrix::zeros(ctx.num_frames(), 2);
        ctx.tac_jacobian(&[0.5, 0.0], &[true, true], &mut out, &mut jac);
        assert!(out.iter().all(|v| v.is_finite()));
        assert!(jac.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn insensitive_columns_are_zero() {
        let ctx = fdg_context(ModelKind::OneTissue, 0.0);
        let mut out = vec![0.0; ctx.num_frames()];
        let mut jac = DMatrix::from_element(ctx.num_frames(), 2, 7.0);
        ctx.tac_jacobian(&[0.5, 0.3], &[true, false], &mut out, &mut jac);
        assert!(jac.column(1).iter().all(|&v| v == 0.0));
        assert!(jac.column(0).iter().any(|&v| v != 0.0));
    }
}
