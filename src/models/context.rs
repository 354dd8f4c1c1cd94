//! Shared, read-only inputs of a fitting session.
//!
//! A [`KineticContext`] bundles everything the forward models need that does
//! not vary per voxel: scan timing, blood input curves, the decay constant
//! and the selected model variant. It is built once and shared by reference
//! across all workers.

use nalgebra::DMatrix;
use thiserror::Error;

use crate::domain::ModelKind;
use crate::math::{phi1, Sampled, Trace};
use crate::models::{evaluator, KineticModel};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("scan timing has no frames")]
    NoFrames,
    #[error("scan timing has {starts} start times but {ends} end times")]
    EndCount { starts: usize, ends: usize },
    #[error("frame {frame}: invalid times start={start}, end={end} (need finite, 0 <= start < end)")]
    InvalidFrame { frame: usize, start: f64, end: f64 },
    #[error("scan timing has {0} columns; expected 2 (start, end) or 1 (start) with a frame duration")]
    TimingShape(usize),
    #[error("scan timing given as start times only, but no frame duration was supplied")]
    MissingFrameDuration,
    #[error("blood step must be finite and > 0, got {0}")]
    InvalidBloodStep(f64),
    #[error("plasma input curve is empty")]
    EmptyPlasma,
    #[error("whole-blood curve has {whole_blood} samples but plasma has {plasma}")]
    BloodLength { plasma: usize, whole_blood: usize },
    #[error("decay constant must be finite and >= 0, got {0}")]
    InvalidDecay(f64),
}

/// Frame start/end times.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanTiming {
    start: Vec<f64>,
    end: Vec<f64>,
}

impl ScanTiming {
    pub fn from_start_end(start: Vec<f64>, end: Vec<f64>) -> Result<Self, ContextError> {
        if start.is_empty() {
            return Err(ContextError::NoFrames);
        }
        if start.len() != end.len() {
            return Err(ContextError::EndCount {
                starts: start.len(),
                ends: end.len(),
            });
        }
        for (frame, (&s, &e)) in start.iter().zip(&end).enumerate() {
            if !(s.is_finite() && e.is_finite() && s >= 0.0 && e > s) {
                return Err(ContextError::InvalidFrame {
                    frame,
                    start: s,
                    end: e,
                });
            }
        }
        Ok(Self { start, end })
    }

    /// Frames of equal length `duration` starting at `start`.
    pub fn from_starts(start: Vec<f64>, duration: f64) -> Result<Self, ContextError> {
        let end = start.iter().map(|s| s + duration).collect();
        Self::from_start_end(start, end)
    }

    /// Build from a frames x 2 (start, end) matrix, or a frames x 1 start
    /// column plus `frame_duration`.
    pub fn from_matrix(m: &DMatrix<f64>, frame_duration: Option<f64>) -> Result<Self, ContextError> {
        match m.ncols() {
            2 => Self::from_start_end(
                m.column(0).iter().copied().collect(),
                m.column(1).iter().copied().collect(),
            ),
            1 => {
                let td = frame_duration.ok_or(ContextError::MissingFrameDuration)?;
                Self::from_starts(m.column(0).iter().copied().collect(), td)
            }
            n => Err(ContextError::TimingShape(n)),
        }
    }

    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    pub fn start(&self) -> &[f64] {
        &self.start
    }

    pub fn end(&self) -> &[f64] {
        &self.end
    }

    pub fn mid_times(&self) -> Vec<f64> {
        self.start.iter().zip(&self.end).map(|(s, e)| 0.5 * (s + e)).collect()
    }
}

/// Blood input curves sampled uniformly from `t = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct BloodInput {
    pub step: f64,
    pub plasma: Vec<f64>,
    /// Whole-blood activity for the vascular term; plasma is used when absent.
    pub whole_blood: Option<Vec<f64>>,
}

impl BloodInput {
    fn validate(&self) -> Result<(), ContextError> {
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(ContextError::InvalidBloodStep(self.step));
        }
        if self.plasma.is_empty() {
            return Err(ContextError::EmptyPlasma);
        }
        if let Some(wb) = &self.whole_blood {
            if wb.len() != self.plasma.len() {
                return Err(ContextError::BloodLength {
                    plasma: self.plasma.len(),
                    whole_blood: wb.len(),
                });
            }
        }
        Ok(())
    }

    /// Samples multiplied by `e^{-dk t}` (activity without decay correction).
    fn decayed(&self, values: &[f64], decay: f64) -> Sampled {
        let values = values
            .iter()
            .enumerate()
            .map(|(i, v)| v * (-decay * i as f64 * self.step).exp())
            .collect();
        Sampled::new(self.step, values)
    }
}

/// Frame boundaries merged into one sorted knot list.
///
/// Convolutions report their running integral at knots; a frame average is
/// then a difference of two integrals divided by the decay-weighted frame
/// length `∫ e^{-dk t} dt`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameGrid {
    start: Vec<f64>,
    end: Vec<f64>,
    knots: Vec<f64>,
    start_idx: Vec<usize>,
    end_idx: Vec<usize>,
}

impl FrameGrid {
    pub fn new(timing: &ScanTiming) -> Self {
        let mut knots: Vec<f64> = timing.start().iter().chain(timing.end()).copied().collect();
        knots.sort_by(f64::total_cmp);
        knots.dedup();

        let locate = |t: f64| knots.partition_point(|&k| k < t);
        let start_idx = timing.start().iter().map(|&t| locate(t)).collect();
        let end_idx = timing.end().iter().map(|&t| locate(t)).collect();

        Self {
            start: timing.start().to_vec(),
            end: timing.end().to_vec(),
            knots,
            start_idx,
            end_idx,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.start.len()
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// Knots shifted earlier by `delay`, clamped at zero (no activity before
    /// the input starts).
    pub fn shifted_knots(&self, delay: f64) -> Vec<f64> {
        self.knots.iter().map(|k| (k - delay).max(0.0)).collect()
    }

    /// Decay-weighted frame averages of `trace` (computed on knots shifted by
    /// `delay`).
    pub fn average(&self, trace: &Trace, decay: f64, delay: f64, out: &mut [f64]) {
        for f in 0..self.num_frames() {
            let (i, j) = (self.start_idx[f], self.end_idx[f]);
            let w = window_weight(self.start[f] - delay, self.end[f] - delay, decay);
            out[f] = (trace.integral[j] - trace.integral[i]) / w;
        }
    }

    /// Derivative of [`FrameGrid::average`] with respect to `delay`, given the
    /// averages already computed from the same trace.
    pub fn delay_slope(&self, trace: &Trace, averages: &[f64], decay: f64, delay: f64, out: &mut [f64]) {
        for f in 0..self.num_frames() {
            let (i, j) = (self.start_idx[f], self.end_idx[f]);
            let a = self.start[f] - delay;
            let b = self.end[f] - delay;
            let w = window_weight(a, b, decay);
            let dw = (-decay * a).exp() - (-decay * b).exp();
            // No activity before the input starts.
            let ua = if a > 0.0 { trace.value[i] } else { 0.0 };
            let ub = if b > 0.0 { trace.value[j] } else { 0.0 };
            out[f] = (ua - ub - averages[f] * dw) / w;
        }
    }
}

/// `∫_a^b e^{-dk t} dt`.
fn window_weight(a: f64, b: f64, decay: f64) -> f64 {
    let len = b - a;
    (-decay * a).exp() * len * phi1(-decay * len)
}

/// Everything shared across voxels during one fitting session.
#[derive(Debug)]
pub struct KineticContext {
    decay: f64,
    timing: ScanTiming,
    frames: FrameGrid,
    plasma: Sampled,
    whole_blood: Sampled,
    model: Box<dyn KineticModel>,
}

impl KineticContext {
    /// Build a context for one of the built-in model variants.
    pub fn new(
        kind: ModelKind,
        timing: ScanTiming,
        blood: BloodInput,
        decay: f64,
    ) -> Result<Self, ContextError> {
        Self::with_model(evaluator(kind), timing, blood, decay)
    }

    /// Build a context around any evaluator implementation.
    pub fn with_model(
        model: Box<dyn KineticModel>,
        timing: ScanTiming,
        blood: BloodInput,
        decay: f64,
    ) -> Result<Self, ContextError> {
        if !(decay.is_finite() && decay >= 0.0) {
            return Err(ContextError::InvalidDecay(decay));
        }
        if timing.is_empty() {
            return Err(ContextError::NoFrames);
        }
        blood.validate()?;

        let plasma = blood.decayed(&blood.plasma, decay);
        let whole_blood = match &blood.whole_blood {
            Some(wb) => blood.decayed(wb, decay),
            None => plasma.clone(),
        };
        let frames = FrameGrid::new(&timing);

        Ok(Self {
            decay,
            timing,
            frames,
            plasma,
            whole_blood,
            model,
        })
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn timing(&self) -> &ScanTiming {
        &self.timing
    }

    pub fn frames(&self) -> &FrameGrid {
        &self.frames
    }

    /// Plasma input with decay applied.
    pub fn plasma(&self) -> &Sampled {
        &self.plasma
    }

    /// Whole-blood input with decay applied.
    pub fn whole_blood(&self) -> &Sampled {
        &self.whole_blood
    }

    pub fn model(&self) -> &dyn KineticModel {
        self.model.as_ref()
    }

    pub fn num_frames(&self) -> usize {
        self.timing.len()
    }

    pub fn num_params(&self) -> usize {
        self.model.num_params()
    }

    /// Predicted TAC at `params`.
    pub fn tac(&self, params: &[f64], out: &mut [f64]) {
        debug_assert_eq!(params.len(), self.num_params());
        debug_assert_eq!(out.len(), self.num_frames());
        self.model.tac(self, params, out);
    }

    /// Predicted TAC and its Jacobian (frames x params); columns of
    /// insensitive parameters are zero.
    pub fn tac_jacobian(&self, params: &[f64], sensitive: &[bool], out: &mut [f64], jac: &mut DMatrix<f64>) {
        debug_assert_eq!(jac.nrows(), self.num_frames());
        debug_assert_eq!(jac.ncols(), self.num_params());
        self.model.tac_jacobian(self, params, sensitive, out, jac);
    }
}
