//! The evaluator interface shared by all kinetic models.
//!
//! The fitter relies on two capabilities:
//! - predict the frame-averaged TAC for a parameter vector (step evaluation)
//! - predict the TAC together with its Jacobian (step proposal)
//!
//! Each compartmental topology implements both; the context holds the
//! selected variant.

use std::fmt::Debug;

use nalgebra::DMatrix;

use crate::domain::ModelKind;
use crate::models::KineticContext;
use crate::models::liver::Liver;
use crate::models::one_tissue::OneTissue;
use crate::models::two_tissue::TwoTissue;

/// A compartmental forward model.
///
/// Implementations never fail: parameter combinations outside the physical
/// range must still produce finite values. Keeping parameters in range is
/// the optimizer's job (bounds).
pub trait KineticModel: Debug + Send + Sync {
    fn kind(&self) -> ModelKind;

    fn param_names(&self) -> &'static [&'static str] {
        self.kind().param_names()
    }

    fn num_params(&self) -> usize {
        self.param_names().len()
    }

    /// Frame-averaged TAC at `params` into `out` (length = frame count).
    fn tac(&self, ctx: &KineticContext, params: &[f64], out: &mut [f64]);

    /// TAC plus the analytic Jacobian (frames x params).
    ///
    /// Columns whose `sensitive` flag is false are set to zero and are not
    /// computed.
    fn tac_jacobian(
        &self,
        ctx: &KineticContext,
        params: &[f64],
        sensitive: &[bool],
        out: &mut [f64],
        jac: &mut DMatrix<f64>,
    );
}

/// The built-in evaluator for `kind`.
pub fn evaluator(kind: ModelKind) -> Box<dyn KineticModel> {
    match kind {
        ModelKind::OneTissue => Box::new(OneTissue),
        ModelKind::TwoTissue => Box::new(TwoTissue),
        ModelKind::Liver => Box::new(Liver),
    }
}

/// Write `values` into column `k` of `jac`.
pub(crate) fn set_column(jac: &mut DMatrix<f64>, k: usize, values: &[f64]) {
    jac.column_mut(k).copy_from_slice(values);
}
