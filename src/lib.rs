//! Involutive Metropolis-Hastings with a library of differentiable distributions.
//!
//! Distributions provide exact sampling, log densities and analytic gradients with
//! respect to the value and every parameter. The MH engine accepts any proposal and
//! involution over a [`Trace`], including dimension changing moves whose Jacobian is
//! computed by a pluggable [`jacobian::Differentiator`].

pub(crate) mod address;
pub(crate) mod broadcast;
pub mod changepoint;
pub(crate) mod choices;
pub mod distributions;
pub mod jacobian;
pub(crate) mod math;
pub(crate) mod mh;
pub(crate) mod model;
pub(crate) mod sampler;
pub(crate) mod storage;
pub(crate) mod trace;

pub use address::{Address, Segment};
pub use broadcast::Broadcast;
pub use choices::{ChoiceMap, ChoiceValue, Value};
pub use distributions::{DistError, Distribution, Grad};
pub use mh::{
    involutive_mh, Cycle, EngineError, Involution, InvolutionResult, Kernel, MhKernel, MhOptions,
    MhOutcome, MoveRecord, SwapInvolution, Transition,
};
pub use model::{
    assess, generate, propose, simulate, Assessor, ChoiceTrace, Handler, Model, Simulator,
    Updater,
};
pub use sampler::{chain_rng, run_chain, sample_chains, AcceptanceStats, ChainOutput, SamplerSettings};
pub use storage::{draws_to_vecs, DrawStorage, ListDrawStorage};
pub use trace::{read_choice, ArgDiff, Trace, TraceError, TraceUpdate};
