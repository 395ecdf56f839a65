//! Involutive Metropolis-Hastings.
//!
//! One step samples auxiliary choices from a proposal, maps `(trace, forward)` to
//! `(candidate, backward)` with an involution and accepts the candidate with
//!
//! ```text
//! log_alpha = update_weight + proposal(backward | candidate)
//!           - proposal(forward | trace) + log|det J|
//! ```
//!
//! Dimension changing moves (reversible jump) fit the same contract.

use rand::{Rng, RngCore};
use thiserror::Error;
use tracing::debug;

use crate::choices::ChoiceMap;
use crate::jacobian::JacobianError;
use crate::model::{assess, propose, Model};
use crate::trace::{ArgDiff, Trace, TraceError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("malformed choices: {0}")]
    Trace(#[from] TraceError),
    #[error("could not compute the jacobian: {0}")]
    Jacobian(#[from] JacobianError),
    #[error("involution has a singular jacobian")]
    SingularJacobian,
    #[error("malformed move: {0}")]
    Malformed(String),
    #[error(
        "acceptance ratio is NaN (update weight {update_weight}, backward {backward}, \
         forward {forward}, log|det J| {log_abs_det})"
    )]
    NanAcceptance {
        update_weight: f64,
        backward: f64,
        forward: f64,
        log_abs_det: f64,
    },
    #[error("involution check failed: {0}")]
    InvolutionCheck(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Output of an [`Involution`].
#[derive(Debug, Clone)]
pub struct InvolutionResult<T> {
    pub trace: T,
    pub backward: ChoiceMap,
    /// `score(candidate) - score(trace)`
    pub update_weight: f64,
    pub log_abs_det: f64,
}

/// A deterministic self-inverse map on `(trace, auxiliary choices)`.
pub trait Involution<T: Trace>: Send + Sync {
    fn apply(&self, trace: &T, forward: &ChoiceMap) -> Result<InvolutionResult<T>>;
}

impl<T, F> Involution<T> for F
where
    T: Trace,
    F: Fn(&T, &ChoiceMap) -> Result<InvolutionResult<T>> + Send + Sync,
{
    fn apply(&self, trace: &T, forward: &ChoiceMap) -> Result<InvolutionResult<T>> {
        self(trace, forward)
    }
}

/// Writes the forward choices into the trace and hands the overwritten values back.
///
/// Turns any proposal over trace addresses into proposal based MH.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapInvolution;

impl<T: Trace> Involution<T> for SwapInvolution {
    fn apply(&self, trace: &T, forward: &ChoiceMap) -> Result<InvolutionResult<T>> {
        let update = trace.update(forward, ArgDiff::NoChange)?;
        Ok(InvolutionResult {
            trace: update.trace,
            backward: update.discard,
            update_weight: update.weight,
            log_abs_det: 0.,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MhOptions {
    /// Apply the involution a second time and verify it returns to the start.
    pub check_involution: bool,
    pub check_tolerance: f64,
}

impl Default for MhOptions {
    fn default() -> Self {
        MhOptions {
            check_involution: false,
            check_tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MhOutcome<T> {
    pub trace: T,
    pub accepted: bool,
    pub log_alpha: f64,
}

fn check_round_trip<T: Trace, I: Involution<T> + ?Sized>(
    involution: &I,
    trace: &T,
    forward: &ChoiceMap,
    result: &InvolutionResult<T>,
    tol: f64,
) -> Result<()> {
    let back = involution.apply(&result.trace, &result.backward)?;
    if let Some(addr) = back.trace.choices().first_difference(trace.choices(), tol) {
        return Err(EngineError::InvolutionCheck(format!(
            "trace differs at {addr} after applying the involution twice"
        )));
    }
    if let Some(addr) = back.backward.first_difference(forward, tol) {
        return Err(EngineError::InvolutionCheck(format!(
            "auxiliary choices differ at {addr} after applying the involution twice"
        )));
    }
    let det_sum = back.log_abs_det + result.log_abs_det;
    if !(det_sum.abs() <= tol * result.log_abs_det.abs().max(1.)) {
        return Err(EngineError::InvolutionCheck(format!(
            "log|det J| is not antisymmetric: {} then {}",
            result.log_abs_det, back.log_abs_det
        )));
    }
    Ok(())
}

/// One involutive MH step. The input trace is only borrowed, so it survives errors.
pub fn involutive_mh<T, P, I, R>(
    rng: &mut R,
    trace: &T,
    proposal: &P,
    involution: &I,
    options: &MhOptions,
) -> Result<MhOutcome<T>>
where
    T: Trace,
    P: Model<Args = T>,
    I: Involution<T> + ?Sized,
    R: Rng + ?Sized,
{
    let (forward, forward_score) = propose(proposal, trace, rng)?;
    let result = involution.apply(trace, &forward)?;
    if result.log_abs_det == f64::NEG_INFINITY {
        return Err(EngineError::SingularJacobian);
    }
    if options.check_involution {
        check_round_trip(involution, trace, &forward, &result, options.check_tolerance)?;
    }
    let backward_score = assess(proposal, &result.trace, &result.backward)?;
    let log_alpha = result.update_weight + backward_score - forward_score + result.log_abs_det;
    if log_alpha.is_nan() {
        return Err(EngineError::NanAcceptance {
            update_weight: result.update_weight,
            backward: backward_score,
            forward: forward_score,
            log_abs_det: result.log_abs_det,
        });
    }
    let u: f64 = rng.random();
    let accepted = u.ln() < log_alpha;
    Ok(MhOutcome {
        trace: if accepted {
            result.trace
        } else {
            trace.clone()
        },
        accepted,
        log_alpha,
    })
}

/// Record of one MH step inside a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRecord {
    pub name: String,
    pub accepted: bool,
    pub log_alpha: f64,
}

#[derive(Debug, Clone)]
pub struct Transition<T> {
    pub trace: T,
    pub moves: Vec<MoveRecord>,
}

/// A Markov kernel on traces.
pub trait Kernel<T>: Send + Sync {
    fn name(&self) -> &str;

    fn step(&self, rng: &mut dyn RngCore, trace: &T) -> Result<Transition<T>>;
}

/// A proposal and an involution packaged as a [`Kernel`].
pub struct MhKernel<P, I> {
    name: String,
    proposal: P,
    involution: I,
    options: MhOptions,
}

impl<P, I> MhKernel<P, I> {
    pub fn new(name: impl Into<String>, proposal: P, involution: I) -> Self {
        MhKernel {
            name: name.into(),
            proposal,
            involution,
            options: MhOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MhOptions) -> Self {
        self.options = options;
        self
    }
}

impl<T, P, I> Kernel<T> for MhKernel<P, I>
where
    T: Trace,
    P: Model<Args = T>,
    I: Involution<T>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&self, rng: &mut dyn RngCore, trace: &T) -> Result<Transition<T>> {
        let outcome = involutive_mh(rng, trace, &self.proposal, &self.involution, &self.options)?;
        debug!(
            kernel = %self.name,
            log_alpha = outcome.log_alpha,
            accepted = outcome.accepted,
            "kernel step"
        );
        Ok(Transition {
            trace: outcome.trace,
            moves: vec![MoveRecord {
                name: self.name.clone(),
                accepted: outcome.accepted,
                log_alpha: outcome.log_alpha,
            }],
        })
    }
}

/// Applies kernels one after the other.
pub struct Cycle<T> {
    name: String,
    kernels: Vec<Box<dyn Kernel<T>>>,
}

impl<T> Cycle<T> {
    pub fn new(name: impl Into<String>, kernels: Vec<Box<dyn Kernel<T>>>) -> Self {
        Cycle {
            name: name.into(),
            kernels,
        }
    }

    pub fn kernels(&self) -> &[Box<dyn Kernel<T>>] {
        &self.kernels
    }
}

impl<T: Clone + Send + Sync> Kernel<T> for Cycle<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&self, rng: &mut dyn RngCore, trace: &T) -> Result<Transition<T>> {
        let mut current = trace.clone();
        let mut moves = Vec::with_capacity(self.kernels.len());
        for kernel in &self.kernels {
            let transition = kernel.step(rng, &current)?;
            current = transition.trace;
            moves.extend(transition.moves);
        }
        Ok(Transition {
            trace: current,
            moves,
        })
    }
}
