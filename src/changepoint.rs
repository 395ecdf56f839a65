//! Reversible jump moves for a change-point model of event times.
//!
//! Events on `[start, end]` follow a Poisson process whose rate is constant between
//! consecutive change-points:
//!
//! ```text
//! k     ~ Poisson(poisson_rate)
//! cp_i  ~ MinUniform(cp_{i-1}, end, k - i + 1)     i = 1..=k, cp_0 = start
//! h_j   ~ Gamma(height_shape, height_scale)         j = 0..=k
//! events ~ PiecewisePoissonProcess([start, cp_1, .., cp_k, end], h)
//! ```
//!
//! Three moves act on it: a multiplicative walk on one rate, a uniform resample of one
//! change-point between its neighbours, and a birth/death move that changes `k`.

use std::sync::Arc;

use faer::Mat;
use rand::Rng;

use crate::address::Address;
use crate::choices::ChoiceMap;
use crate::distributions::{
    Bernoulli, Gamma, MinUniform, Normal, PiecewisePoissonProcess, Poisson, Uniform,
    UniformDiscrete,
};
use crate::jacobian::{CoordinateTransform, Differentiator, Scalar};
use crate::mh::{
    Cycle, EngineError, Involution, InvolutionResult, Kernel, MhKernel, MhOptions, Transition,
};
use crate::model::{generate, ChoiceTrace, Handler, Model};
use crate::trace::{read_choice, ArgDiff, Trace, TraceError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangePointConfig {
    pub start: f64,
    pub end: f64,
    /// Prior mean of the number of change-points.
    pub poisson_rate: f64,
    pub height_shape: f64,
    pub height_scale: f64,
}

impl Default for ChangePointConfig {
    fn default() -> Self {
        ChangePointConfig {
            start: 0.,
            end: 1.,
            poisson_rate: 3.,
            height_shape: 2.,
            height_scale: 1.,
        }
    }
}

fn cp_addr(i: usize) -> Address {
    ("cp", i).into()
}

fn height_addr(j: usize) -> Address {
    ("h", j).into()
}

#[derive(Debug, Clone, Copy)]
pub struct ChangePointModel {
    pub config: ChangePointConfig,
}

impl Model for ChangePointModel {
    type Args = ();

    fn run<H: Handler>(&self, _: &(), h: &mut H) -> Result<(), TraceError> {
        let cfg = &self.config;
        let k = h.sample("k", &Poisson, cfg.poisson_rate)?;
        let k = usize::try_from(k).unwrap_or(0);

        let mut bounds = Vec::with_capacity(k + 2);
        bounds.push(cfg.start);
        for i in 1..=k {
            let prev = bounds[i - 1];
            let remaining = (k - i + 1) as u64;
            bounds.push(h.sample(cp_addr(i), &MinUniform, (prev, cfg.end, remaining))?);
        }
        bounds.push(cfg.end);

        let heights = (0..=k)
            .map(|j| h.sample(height_addr(j), &Gamma, (cfg.height_shape, cfg.height_scale)))
            .collect::<Result<Vec<f64>, _>>()?;

        h.sample("events", &PiecewisePoissonProcess, (bounds, heights))?;
        Ok(())
    }
}

pub type ChangePointTrace = ChoiceTrace<ChangePointModel>;

/// Draw a trace from the prior with the event times fixed.
pub fn initial_trace<R: Rng + ?Sized>(
    config: ChangePointConfig,
    events: Vec<f64>,
    rng: &mut R,
) -> Result<ChangePointTrace, TraceError> {
    let observations = ChoiceMap::new().with("events", events);
    let (trace, _) = generate(Arc::new(ChangePointModel { config }), (), &observations, rng)?;
    Ok(trace)
}

pub fn num_changepoints<T: Trace>(trace: &T) -> Result<usize, TraceError> {
    let k: i64 = trace.get_as(&"k".into())?;
    Ok(usize::try_from(k).unwrap_or(0))
}

/// Change-point positions, in increasing order.
pub fn changepoints<T: Trace>(trace: &T) -> Result<Vec<f64>, TraceError> {
    let k = num_changepoints(trace)?;
    (1..=k).map(|i| trace.get_as(&cp_addr(i))).collect()
}

/// Event rates of the `k + 1` segments.
pub fn heights<T: Trace>(trace: &T) -> Result<Vec<f64>, TraceError> {
    let k = num_changepoints(trace)?;
    (0..=k).map(|j| trace.get_as(&height_addr(j))).collect()
}

/// Multiplicative random walk on one segment rate.
#[derive(Debug, Clone, Copy)]
pub struct HeightProposal {
    pub sigma: f64,
}

impl Model for HeightProposal {
    type Args = ChangePointTrace;

    fn run<H: Handler>(&self, trace: &ChangePointTrace, h: &mut H) -> Result<(), TraceError> {
        let k = num_changepoints(trace)?;
        h.sample("j", &UniformDiscrete, (0, k as i64))?;
        h.sample("v", &Normal, (0., self.sigma))?;
        Ok(())
    }
}

/// `(h_j, v) -> (h_j e^v, -v)`
#[derive(Debug, Clone, Copy, Default)]
pub struct HeightInvolution;

impl Involution<ChangePointTrace> for HeightInvolution {
    fn apply(
        &self,
        trace: &ChangePointTrace,
        forward: &ChoiceMap,
    ) -> Result<InvolutionResult<ChangePointTrace>, EngineError> {
        let j: i64 = read_choice(forward, &"j".into())?;
        let v: f64 = read_choice(forward, &"v".into())?;
        let addr: Address = ("h", j).into();
        let height: f64 = trace.get_as(&addr)?;

        let constraints = ChoiceMap::new().with(addr, height * v.exp());
        let update = trace.update(&constraints, ArgDiff::NoChange)?;
        Ok(InvolutionResult {
            trace: update.trace,
            backward: ChoiceMap::new().with("j", j).with("v", -v),
            update_weight: update.weight,
            log_abs_det: v,
        })
    }
}

/// Resample one change-point uniformly between its neighbours.
#[derive(Debug, Clone, Copy)]
pub struct PositionProposal {
    pub config: ChangePointConfig,
}

fn neighbours(config: &ChangePointConfig, cps: &[f64], i: usize) -> (f64, f64) {
    let lo = if i > 1 { cps[i - 2] } else { config.start };
    let hi = if i < cps.len() { cps[i] } else { config.end };
    (lo, hi)
}

impl Model for PositionProposal {
    type Args = ChangePointTrace;

    fn run<H: Handler>(&self, trace: &ChangePointTrace, h: &mut H) -> Result<(), TraceError> {
        let cps = changepoints(trace)?;
        if cps.is_empty() {
            return Ok(());
        }
        let i = h.sample("i", &UniformDiscrete, (1, cps.len() as i64))?;
        let bounds = neighbours(&self.config, &cps, i as usize);
        h.sample("cp", &Uniform, bounds)?;
        Ok(())
    }
}

/// Swaps the proposed position with the current one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionInvolution;

impl Involution<ChangePointTrace> for PositionInvolution {
    fn apply(
        &self,
        trace: &ChangePointTrace,
        forward: &ChoiceMap,
    ) -> Result<InvolutionResult<ChangePointTrace>, EngineError> {
        if forward.is_empty() {
            return Ok(InvolutionResult {
                trace: trace.clone(),
                backward: ChoiceMap::new(),
                update_weight: 0.,
                log_abs_det: 0.,
            });
        }
        let i: i64 = read_choice(forward, &"i".into())?;
        let proposed: f64 = read_choice(forward, &"cp".into())?;
        let addr: Address = ("cp", i).into();
        let current: f64 = trace.get_as(&addr)?;

        let update = trace.update(&ChoiceMap::new().with(addr, proposed), ArgDiff::NoChange)?;
        Ok(InvolutionResult {
            trace: update.trace,
            backward: ChoiceMap::new().with("i", i).with("cp", current),
            update_weight: update.weight,
            log_abs_det: 0.,
        })
    }
}

/// Offers birth or death of one change-point. Only birth at `k = 0`.
#[derive(Debug, Clone, Copy)]
pub struct BirthDeathProposal {
    pub config: ChangePointConfig,
}

impl Model for BirthDeathProposal {
    type Args = ChangePointTrace;

    fn run<H: Handler>(&self, trace: &ChangePointTrace, h: &mut H) -> Result<(), TraceError> {
        let k = num_changepoints(trace)?;
        let is_birth = if k == 0 {
            true
        } else {
            h.sample("is_birth", &Bernoulli, 0.5)?
        };
        if is_birth {
            h.sample("new_cp", &Uniform, (self.config.start, self.config.end))?;
            h.sample("u", &Uniform, (0., 1.))?;
        } else {
            h.sample("idx", &UniformDiscrete, (1, k as i64))?;
        }
        Ok(())
    }
}

/// `(h, u) -> (h_prev, h_next)` for a new change-point splitting a segment into
/// pieces of length `d_prev` and `d_next`.
///
/// The length weighted geometric mean of the two rates equals `h`, and
/// `u = h_prev / (h_prev + h_next)`.
#[derive(Debug, Clone, Copy)]
pub struct SplitHeight {
    pub d_prev: f64,
    pub d_next: f64,
}

impl CoordinateTransform for SplitHeight {
    fn dim(&self) -> usize {
        2
    }

    fn apply<S: Scalar>(&self, x: &[S]) -> Vec<S> {
        let total = self.d_prev + self.d_next;
        let (h, u) = (x[0], x[1]);
        let log_ratio = ((S::constant(1.) - u) / u).ln();
        let h_prev = h * (-(S::constant(self.d_next / total) * log_ratio)).exp();
        let h_next = h * (S::constant(self.d_prev / total) * log_ratio).exp();
        vec![h_prev, h_next]
    }

    fn jacobian(&self, x: &[f64]) -> Option<Mat<f64>> {
        let total = self.d_prev + self.d_next;
        let (h, u) = (x[0], x[1]);
        let out = self.apply(x);
        let (h_prev, h_next) = (out[0], out[1]);
        let dlog = 1. / (u * (1. - u));
        let entries = [
            [h_prev / h, h_prev * self.d_next / total * dlog],
            [h_next / h, -h_next * self.d_prev / total * dlog],
        ];
        Some(Mat::from_fn(2, 2, |i, j| entries[i][j]))
    }
}

/// Inverse of [`SplitHeight`], `(h_prev, h_next) -> (h, u)`.
#[derive(Debug, Clone, Copy)]
pub struct MergeHeight {
    pub d_prev: f64,
    pub d_next: f64,
}

impl CoordinateTransform for MergeHeight {
    fn dim(&self) -> usize {
        2
    }

    fn apply<S: Scalar>(&self, x: &[S]) -> Vec<S> {
        let total = self.d_prev + self.d_next;
        let (h_prev, h_next) = (x[0], x[1]);
        let log_h = (S::constant(self.d_prev) * h_prev.ln() + S::constant(self.d_next) * h_next.ln())
            / S::constant(total);
        vec![log_h.exp(), h_prev / (h_prev + h_next)]
    }

    fn jacobian(&self, x: &[f64]) -> Option<Mat<f64>> {
        let total = self.d_prev + self.d_next;
        let (h_prev, h_next) = (x[0], x[1]);
        let h = self.apply(x)[0];
        let sum_sq = (h_prev + h_next) * (h_prev + h_next);
        let entries = [
            [h * self.d_prev / total / h_prev, h * self.d_next / total / h_next],
            [h_next / sum_sq, -h_prev / sum_sq],
        ];
        Some(Mat::from_fn(2, 2, |i, j| entries[i][j]))
    }
}

/// Birth inserts a change-point and splits its segment rate, death removes one
/// and merges the two adjacent rates.
#[derive(Debug, Clone, Copy)]
pub struct BirthDeathInvolution<D> {
    pub config: ChangePointConfig,
    pub differentiator: D,
}

impl<D: Differentiator> BirthDeathInvolution<D> {
    fn birth(
        &self,
        trace: &ChangePointTrace,
        forward: &ChoiceMap,
    ) -> Result<InvolutionResult<ChangePointTrace>, EngineError> {
        let new_cp: f64 = read_choice(forward, &"new_cp".into())?;
        let u: f64 = read_choice(forward, &"u".into())?;
        let cps = changepoints(trace)?;
        let hs = heights(trace)?;
        let k = cps.len();

        // 1-based position of the new change-point among all k + 1.
        let i = cps.partition_point(|&c| c < new_cp) + 1;
        let prev = if i > 1 { cps[i - 2] } else { self.config.start };
        let next = if i <= k { cps[i - 1] } else { self.config.end };
        if !(prev < new_cp && new_cp < next && u > 0. && u < 1.) {
            // Degenerate draw on a boundary, the move has zero density.
            return Ok(InvolutionResult {
                trace: trace.clone(),
                backward: forward.clone(),
                update_weight: f64::NEG_INFINITY,
                log_abs_det: 0.,
            });
        }

        let split = SplitHeight {
            d_prev: new_cp - prev,
            d_next: next - new_cp,
        };
        let point = [hs[i - 1], u];
        let split_heights = split.apply(&point);
        let log_abs_det = self.differentiator.log_abs_det(&split, &point)?;

        let mut new_cps = cps.clone();
        new_cps.insert(i - 1, new_cp);
        let mut new_hs = hs.clone();
        new_hs[i - 1] = split_heights[0];
        new_hs.insert(i, split_heights[1]);

        let mut constraints = ChoiceMap::new().with("k", (k + 1) as i64);
        for m in i..=k + 1 {
            constraints.set(cp_addr(m), new_cps[m - 1]);
        }
        for m in i - 1..=k + 1 {
            constraints.set(height_addr(m), new_hs[m]);
        }
        let update = trace.update(&constraints, ArgDiff::NoChange)?;
        Ok(InvolutionResult {
            trace: update.trace,
            backward: ChoiceMap::new()
                .with("is_birth", false)
                .with("idx", i as i64),
            update_weight: update.weight,
            log_abs_det,
        })
    }

    fn death(
        &self,
        trace: &ChangePointTrace,
        forward: &ChoiceMap,
    ) -> Result<InvolutionResult<ChangePointTrace>, EngineError> {
        let idx: i64 = read_choice(forward, &"idx".into())?;
        let cps = changepoints(trace)?;
        let hs = heights(trace)?;
        let k = cps.len();
        let i = match usize::try_from(idx) {
            Ok(i) if (1..=k).contains(&i) => i,
            _ => {
                return Err(EngineError::Malformed(format!(
                    "cannot remove change-point {idx} of {k}"
                )))
            }
        };

        let (prev, next) = neighbours(&self.config, &cps, i);
        let removed = cps[i - 1];
        let merge = MergeHeight {
            d_prev: removed - prev,
            d_next: next - removed,
        };
        let point = [hs[i - 1], hs[i]];
        let merged = merge.apply(&point);
        let log_abs_det = self.differentiator.log_abs_det(&merge, &point)?;

        let mut new_cps = cps.clone();
        new_cps.remove(i - 1);
        let mut new_hs = hs.clone();
        new_hs.remove(i);
        new_hs[i - 1] = merged[0];

        let mut constraints = ChoiceMap::new().with("k", (k - 1) as i64);
        for m in i..k {
            constraints.set(cp_addr(m), new_cps[m - 1]);
        }
        for m in i - 1..k {
            constraints.set(height_addr(m), new_hs[m]);
        }
        let update = trace.update(&constraints, ArgDiff::NoChange)?;

        let mut backward = ChoiceMap::new().with("new_cp", removed).with("u", merged[1]);
        if k > 1 {
            backward.set("is_birth", true);
        }
        Ok(InvolutionResult {
            trace: update.trace,
            backward,
            update_weight: update.weight,
            log_abs_det,
        })
    }
}

impl<D: Differentiator> Involution<ChangePointTrace> for BirthDeathInvolution<D> {
    fn apply(
        &self,
        trace: &ChangePointTrace,
        forward: &ChoiceMap,
    ) -> Result<InvolutionResult<ChangePointTrace>, EngineError> {
        let is_birth = match forward.get(&"is_birth".into()) {
            Some(_) => read_choice::<bool>(forward, &"is_birth".into())?,
            None => true,
        };
        if is_birth {
            self.birth(trace, forward)
        } else {
            self.death(trace, forward)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MoveSettings {
    /// Standard deviation of the log-scale step of [`HeightProposal`].
    pub height_sigma: f64,
    pub options: MhOptions,
}

impl Default for MoveSettings {
    fn default() -> Self {
        MoveSettings {
            height_sigma: 0.5,
            options: MhOptions::default(),
        }
    }
}

/// Height, position and birth/death moves applied in turn.
pub struct ChangePointKernel {
    cycle: Cycle<ChangePointTrace>,
}

impl ChangePointKernel {
    pub fn new<D: Differentiator + 'static>(
        config: ChangePointConfig,
        settings: MoveSettings,
        differentiator: D,
    ) -> Self {
        let kernels: Vec<Box<dyn Kernel<ChangePointTrace>>> = vec![
            Box::new(
                MhKernel::new(
                    "height",
                    HeightProposal {
                        sigma: settings.height_sigma,
                    },
                    HeightInvolution,
                )
                .with_options(settings.options),
            ),
            Box::new(
                MhKernel::new("position", PositionProposal { config }, PositionInvolution)
                    .with_options(settings.options),
            ),
            Box::new(
                MhKernel::new(
                    "birth_death",
                    BirthDeathProposal { config },
                    BirthDeathInvolution {
                        config,
                        differentiator,
                    },
                )
                .with_options(settings.options),
            ),
        ];
        ChangePointKernel {
            cycle: Cycle::new("changepoint", kernels),
        }
    }
}

impl Kernel<ChangePointTrace> for ChangePointKernel {
    fn name(&self) -> &str {
        self.cycle.name()
    }

    fn step(
        &self,
        rng: &mut dyn rand::RngCore,
        trace: &ChangePointTrace,
    ) -> Result<Transition<ChangePointTrace>, EngineError> {
        self.cycle.step(rng, trace)
    }
}
