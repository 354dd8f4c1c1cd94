//! Synthetic input curves and noisy TACs for demos and tests.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::error::AppError;
use crate::models::KineticContext;

// Feng et al. (1993) FDG plasma input, time in minutes.
const FENG_A: [f64; 3] = [851.1225, 21.8798, 20.8113];
const FENG_L: [f64; 3] = [-4.133859, -0.01043449, -0.1190996];

/// FDG-like arterial plasma activity at `t` (zero before injection).
pub fn feng_plasma(t: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    let [a1, a2, a3] = FENG_A;
    let [l1, l2, l3] = FENG_L;
    (a1 * t - a2 - a3) * (l1 * t).exp() + a2 * (l2 * t).exp() + a3 * (l3 * t).exp()
}

/// Sample `f` on `0, step, 2 step, ...` up to and including `duration`.
pub fn sample_curve(f: impl Fn(f64) -> f64, step: f64, duration: f64) -> Vec<f64> {
    let n = (duration / step).floor() as usize + 1;
    (0..n).map(|i| f(i as f64 * step)).collect()
}

/// Noise model for [`simulate_tacs`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSpec {
    /// Scale of the count-like noise; `0` returns the noiseless curve.
    pub level: f64,
    pub seed: u64,
}

/// `voxels` noisy copies of the TAC at `truth` (frames x voxels).
///
/// Frame `f` gets Gaussian noise with standard deviation
/// `level * sqrt(|C_f| / duration_f)`, the usual count-statistics shape.
pub fn simulate_tacs(
    ctx: &KineticContext,
    truth: &[f64],
    voxels: usize,
    noise: NoiseSpec,
) -> Result<DMatrix<f64>, AppError> {
    if truth.len() != ctx.num_params() {
        return Err(AppError::new(
            2,
            format!(
                "Truth has {} parameters; {} expects {}.",
                truth.len(),
                ctx.model().kind().display_name(),
                ctx.num_params()
            ),
        ));
    }
    if !(noise.level.is_finite() && noise.level >= 0.0) {
        return Err(AppError::new(2, "Noise level must be finite and >= 0."));
    }

    let nf = ctx.num_frames();
    let mut clean = vec![0.0; nf];
    ctx.tac(truth, &mut clean);

    let timing = ctx.timing();
    let sd: Vec<f64> = clean
        .iter()
        .enumerate()
        .map(|(f, c)| noise.level * (c.abs() / (timing.end()[f] - timing.start()[f])).sqrt())
        .collect();

    let mut rng = StdRng::seed_from_u64(noise.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let mut out = DMatrix::zeros(nf, voxels);
    for v in 0..voxels {
        for f in 0..nf {
            let z: f64 = normal.sample(&mut rng);
            out[(f, v)] = clean[f] + sd[f] * z;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelKind;
    use crate::models::fixtures::{default_params, fdg_context};
    use approx::assert_relative_eq;

    #[test]
    fn feng_input_shape() {
        assert_eq!(feng_plasma(0.0), 0.0);
        assert_eq!(feng_plasma(-1.0), 0.0);
        // Peak within the first minute, slow tail afterwards.
        let curve = sample_curve(feng_plasma, 0.01, 60.0);
        let (peak_idx, _) = curve
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert!(peak_idx > 0 && peak_idx < 100);
        assert!(curve[6000] > 0.0 && curve[6000] < curve[1000]);
    }

    #[test]
    fn sample_curve_includes_endpoint() {
        let v = sample_curve(|t| t, 0.5, 2.0);
        assert_eq!(v, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn zero_noise_reproduces_model() {
        let ctx = fdg_context(ModelKind::OneTissue, 0.0);
        let truth = default_params(ModelKind::OneTissue);
        let tacs = simulate_tacs(&ctx, &truth, 3, NoiseSpec { level: 0.0, seed: 1 }).unwrap();
        let mut clean = vec![0.0; ctx.num_frames()];
        ctx.tac(&truth, &mut clean);
        for v in 0..3 {
            for (f, c) in clean.iter().enumerate() {
                assert_relative_eq!(tacs[(f, v)], *c);
            }
        }
    }

    #[test]
    fn seeded_noise_is_reproducible() {
        let ctx = fdg_context(ModelKind::OneTissue, 0.0);
        let truth = default_params(ModelKind::OneTissue);
        let noise = NoiseSpec { level: 0.5, seed: 42 };
        let a = simulate_tacs(&ctx, &truth, 4, noise).unwrap();
        let b = simulate_tacs(&ctx, &truth, 4, noise).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.column(0), a.column(1));
    }

    #[test]
    fn rejects_wrong_parameter_count() {
        let ctx = fdg_context(ModelKind::TwoTissue, 0.0);
        let err = simulate_tacs(&ctx, &[0.1, 0.2], 1, NoiseSpec { level: 0.0, seed: 0 }).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
