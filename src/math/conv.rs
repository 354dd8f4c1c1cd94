//! Exponential convolution of sampled input curves.
//!
//! Every compartmental model reduces to sums of
//!
//! ```text
//! u(t) = ∫_0^t e^{-r (t - s)} c(s) ds
//! ```
//!
//! where `c` is a blood curve sampled on a uniform grid and linear between
//! samples. On each linear piece of length `h` with end values `a`, `b`:
//!
//! ```text
//! u(t + h) = e^{-rh} u(t) + h [a φ1 + (b - a) φ2]
//! ∫ u      = h u(t) φ1 + h² [a φ2 + (b - a) φ3]
//! ```
//!
//! with `φn = φn(-rh)`. This is exact for the piecewise-linear input, so the
//! running integral used for frame averages carries no quadrature error, and
//! differentiating the same recurrence in `r` gives exact rate derivatives.
//!
//! Results are reported at sorted query times ("knots", the frame
//! boundaries) and optionally at every grid sample (used when a convolution
//! feeds another convolution, as for the portal-vein input).

use crate::math::basis::phi;

/// A curve sampled uniformly from `t = 0`.
///
/// Linear between samples, zero before `t = 0`, constant after the last
/// sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sampled {
    step: f64,
    values: Vec<f64>,
}

impl Sampled {
    pub fn new(step: f64, values: Vec<f64>) -> Self {
        Self { step, values }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Linear interpolation at `t`.
    pub fn at(&self, t: f64) -> f64 {
        let Some(&last) = self.values.last() else {
            return 0.0;
        };
        if t < 0.0 {
            return 0.0;
        }
        let x = t / self.step;
        // Compare in f64: the cast saturates for very large t.
        if x >= (self.values.len() - 1) as f64 {
            return last;
        }
        let i = x.floor() as usize;
        let frac = x - i as f64;
        self.values[i] + frac * (self.values[i + 1] - self.values[i])
    }

    /// Value and running integral of the curve itself at `knots`.
    pub fn trace(&self, knots: &[f64]) -> Trace {
        let mut m = IntegralMarch {
            input: self,
            integral: 0.0,
            out: Trace::zeros(knots.len()),
            knots,
        };
        march(self.step, self.len(), knots, &mut m);
        m.out
    }
}

/// Activity and its running integral from `t = 0`, reported at knots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub value: Vec<f64>,
    pub integral: Vec<f64>,
}

impl Trace {
    pub fn zeros(n: usize) -> Self {
        Self {
            value: vec![0.0; n],
            integral: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// `self += a * other`.
    pub fn add_scaled(&mut self, a: f64, other: &Trace) {
        for (x, y) in self.value.iter_mut().zip(&other.value) {
            *x += a * y;
        }
        for (x, y) in self.integral.iter_mut().zip(&other.integral) {
            *x += a * y;
        }
    }

    /// `a * self`, as a new trace.
    pub fn scaled(&self, a: f64) -> Trace {
        Trace {
            value: self.value.iter().map(|v| a * v).collect(),
            integral: self.integral.iter().map(|v| a * v).collect(),
        }
    }
}

/// What a convolution should report besides the trace at knots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvRequest {
    /// Also report `∂/∂r` of the trace (and of the grid samples).
    pub derivative: bool,
    /// Also report `u` at every input grid sample.
    pub grid: bool,
}

/// Output of [`convolve`].
#[derive(Debug, Clone, Default)]
pub struct Convolution {
    pub trace: Trace,
    pub d_rate: Option<Trace>,
    pub grid: Option<Vec<f64>>,
    pub d_grid: Option<Vec<f64>>,
}

/// Convolve `e^{-rate t}` with `input`, reporting at sorted `knots`.
///
/// Knots must be non-decreasing; knots at or before zero report zero.
pub fn convolve(input: &Sampled, rate: f64, knots: &[f64], req: ConvRequest) -> Convolution {
    let n = input.len();
    let mut m = ConvMarch {
        input,
        rate,
        req,
        u: 0.0,
        big_u: 0.0,
        du: 0.0,
        d_big_u: 0.0,
        trace: Trace::zeros(knots.len()),
        d_trace: Trace::zeros(if req.derivative { knots.len() } else { 0 }),
        grid: vec![0.0; if req.grid { n } else { 0 }],
        d_grid: vec![0.0; if req.grid && req.derivative { n } else { 0 }],
    };
    march(input.step(), n, knots, &mut m);

    Convolution {
        trace: m.trace,
        d_rate: req.derivative.then_some(m.d_trace),
        grid: req.grid.then_some(m.grid),
        d_grid: (req.grid && req.derivative).then_some(m.d_grid),
    }
}

/// Callbacks driven by [`march`].
trait Marcher {
    /// Advance the state across `[t, t + h]`, on which the input is linear.
    fn advance(&mut self, t: f64, h: f64);
    /// The state is at grid sample `g`.
    fn at_grid(&mut self, g: usize);
    /// The state is at knot `q`.
    fn at_knot(&mut self, q: usize);
    fn wants_grid(&self) -> bool;
}

/// Walk from `t = 0` through every grid breakpoint and knot in time order.
fn march<M: Marcher>(step: f64, len: usize, knots: &[f64], m: &mut M) {
    let want_grid = m.wants_grid();
    if len > 0 && want_grid {
        m.at_grid(0);
    }

    let mut q = 0;
    while q < knots.len() && knots[q] <= 0.0 {
        m.at_knot(q);
        q += 1;
    }

    let mut t = 0.0_f64;
    let mut g = 1usize;
    while q < knots.len() || (want_grid && g < len) {
        let tg = if g < len { g as f64 * step } else { f64::INFINITY };
        let tq = knots.get(q).copied().unwrap_or(f64::INFINITY);
        let next = tg.min(tq);
        if !next.is_finite() {
            // Only non-finite knots remain; report the current state.
            while q < knots.len() {
                m.at_knot(q);
                q += 1;
            }
            break;
        }
        if next > t {
            m.advance(t, next - t);
            t = next;
        }
        if tg <= t {
            if want_grid {
                m.at_grid(g);
            }
            g += 1;
        }
        while q < knots.len() && knots[q] <= t {
            m.at_knot(q);
            q += 1;
        }
    }
}

struct ConvMarch<'a> {
    input: &'a Sampled,
    rate: f64,
    req: ConvRequest,
    u: f64,
    big_u: f64,
    du: f64,
    d_big_u: f64,
    trace: Trace,
    d_trace: Trace,
    grid: Vec<f64>,
    d_grid: Vec<f64>,
}

impl Marcher for ConvMarch<'_> {
    fn advance(&mut self, t: f64, h: f64) {
        let a = self.input.at(t);
        let slope = self.input.at(t + h) - a;
        let f = phi(-self.rate * h);
        let (u, du) = (self.u, self.du);

        if self.req.derivative {
            // ∂z/∂r = -h for z = -r h.
            self.d_big_u += h * du * f.p1 - h * h * u * f.d1 - h * h * h * (a * f.d2 + slope * f.d3);
            self.du = f.e * du - h * f.e * u - h * h * (a * f.d1 + slope * f.d2);
        }
        self.big_u += h * u * f.p1 + h * h * (a * f.p2 + slope * f.p3);
        self.u = f.e * u + h * (a * f.p1 + slope * f.p2);
    }

    fn at_grid(&mut self, g: usize) {
        self.grid[g] = self.u;
        if self.req.derivative {
            self.d_grid[g] = self.du;
        }
    }

    fn at_knot(&mut self, q: usize) {
        self.trace.value[q] = self.u;
        self.trace.integral[q] = self.big_u;
        if self.req.derivative {
            self.d_trace.value[q] = self.du;
            self.d_trace.integral[q] = self.d_big_u;
        }
    }

    fn wants_grid(&self) -> bool {
        self.req.grid
    }
}

struct IntegralMarch<'a> {
    input: &'a Sampled,
    integral: f64,
    out: Trace,
    knots: &'a [f64],
}

impl Marcher for IntegralMarch<'_> {
    fn advance(&mut self, t: f64, h: f64) {
        self.integral += 0.5 * h * (self.input.at(t) + self.input.at(t + h));
    }

    fn at_grid(&mut self, _g: usize) {}

    fn at_knot(&mut self, q: usize) {
        self.out.value[q] = self.input.at(self.knots[q].max(0.0));
        self.out.integral[q] = self.integral;
    }

    fn wants_grid(&self) -> bool {
        false
    }
}
