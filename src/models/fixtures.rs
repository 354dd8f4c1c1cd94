//! Shared test inputs for the forward models.

use approx::assert_relative_eq;
use nalgebra::DMatrix;

use crate::data::sample::{feng_plasma, sample_curve};
use crate::domain::ModelKind;
use crate::models::{BloodInput, KineticContext, ScanTiming};

pub(crate) const BLOOD_STEP: f64 = 0.05;

/// 20 frames over ~57 min with increasing duration.
pub(crate) fn fdg_timing() -> ScanTiming {
    let durations = [(4, 0.25), (4, 0.5), (4, 1.0), (4, 2.5), (4, 10.0)];
    let mut start = Vec::new();
    let mut end = Vec::new();
    let mut t = 0.0;
    for (count, d) in durations {
        for _ in 0..count {
            start.push(t);
            t += d;
            end.push(t);
        }
    }
    ScanTiming::from_start_end(start, end).unwrap()
}

pub(crate) fn fdg_blood() -> BloodInput {
    let plasma = sample_curve(feng_plasma, BLOOD_STEP, 62.0);
    let whole_blood = plasma.iter().map(|v| 0.9 * v).collect();
    BloodInput {
        step: BLOOD_STEP,
        plasma,
        whole_blood: Some(whole_blood),
    }
}

pub(crate) fn fdg_context(kind: ModelKind, decay: f64) -> KineticContext {
    KineticContext::new(kind, fdg_timing(), fdg_blood(), decay).unwrap()
}

pub(crate) fn default_params(kind: ModelKind) -> Vec<f64> {
    match kind {
        ModelKind::OneTissue => vec![0.1, 0.15],
        ModelKind::TwoTissue => vec![0.6, 0.9, 0.1, 0.02, 0.05],
        ModelKind::Liver => vec![0.8, 1.0, 0.02, 0.01, 0.08, 0.25, 1.5, 0.2],
    }
}

/// Compare the analytic Jacobian against central differences, column by
/// column.
pub(crate) fn assert_jacobian_matches(ctx: &KineticContext, params: &[f64], rel_tol: f64) {
    let nf = ctx.num_frames();
    let np = params.len();
    let mut out = vec![0.0; nf];
    let mut jac = DMatrix::zeros(nf, np);
    ctx.tac_jacobian(params, &vec![true; np], &mut out, &mut jac);

    let mut lo = vec![0.0; nf];
    let mut hi = vec![0.0; nf];
    for k in 0..np {
        let h = 1e-6 * params[k].abs().max(1e-2);
        let mut p = params.to_vec();
        p[k] = params[k] - h;
        ctx.tac(&p, &mut lo);
        p[k] = params[k] + h;
        ctx.tac(&p, &mut hi);

        let scale = jac.column(k).amax();
        for f in 0..nf {
            let fd = (hi[f] - lo[f]) / (2.0 * h);
            assert_relative_eq!(
                jac[(f, k)],
                fd,
                max_relative = rel_tol,
                epsilon = rel_tol * scale + 1e-10
            );
        }
    }
}
