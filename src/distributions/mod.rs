//! Probability distributions with sampling, log densities and log density gradients.
//!
//! Every law implements [`Distribution`]. Distributions are zero sized and stateless;
//! parameters are passed to each call, randomness comes from the caller.

use ndarray::ArrayD;
use rand::Rng;
use thiserror::Error;

use crate::choices::ChoiceValue;

mod broadcasted;
mod continuous;
mod custom;
mod discrete;
mod multivariate;

pub use broadcasted::BroadcastedNormal;
pub use continuous::{
    Beta, BetaUniformMixture, Cauchy, Exponential, Gamma, InverseGamma, Laplace, Normal,
    PiecewiseUniform, Uniform,
};
pub use custom::{MinUniform, PiecewisePoissonProcess};
pub use discrete::{
    Bernoulli, Binomial, Categorical, Geometric, NegativeBinomial, Poisson, UniformDiscrete,
};
pub use multivariate::{Dirichlet, MvNormal};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}

pub type Result<T> = std::result::Result<T, DistError>;

/// Gradient of a log density with respect to one argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Grad {
    /// The argument is discrete or otherwise not differentiable.
    Undefined,
    Scalar(f64),
    Vector(Vec<f64>),
    Array(ArrayD<f64>),
}

impl Grad {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Grad::Undefined)
    }

    pub fn scalar(&self) -> Option<f64> {
        match self {
            Grad::Scalar(x) => Some(*x),
            _ => None,
        }
    }

    pub fn vector(&self) -> Option<&[f64]> {
        match self {
            Grad::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn array(&self) -> Option<&ArrayD<f64>> {
        match self {
            Grad::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// A probability law over `Value` with parameters `Params`.
pub trait Distribution: Send + Sync {
    type Value: ChoiceValue;
    type Params: Clone + std::fmt::Debug;

    fn name(&self) -> &'static str;

    /// Draw one value. Fails if the parameters are invalid.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, params: &Self::Params) -> Result<Self::Value>;

    /// Log density (or mass). `-inf` outside the support.
    fn log_density(&self, value: &Self::Value, params: &Self::Params) -> Result<f64>;

    /// Gradient of the log density, one entry for the value followed by one per parameter.
    fn log_density_grad(&self, value: &Self::Value, params: &Self::Params) -> Result<Vec<Grad>>;

    /// Which arguments (value first) have defined gradients.
    fn differentiable(&self) -> &'static [bool];
}

pub(crate) fn check_positive(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.) {
        return Err(DistError::InvalidParameter(format!(
            "{name} must be finite and > 0, got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn check_finite(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(DistError::InvalidParameter(format!(
            "{name} must be finite, got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn check_probability(name: &str, value: f64) -> Result<()> {
    if !(0. ..=1.).contains(&value) {
        return Err(DistError::InvalidParameter(format!(
            "{name} must be in [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Tolerance for probability vectors and simplex points summing to one.
pub(crate) const SIMPLEX_TOL: f64 = 1e-8;

pub(crate) fn check_probability_vector(name: &str, probs: &[f64]) -> Result<()> {
    if probs.is_empty() {
        return Err(DistError::InvalidParameter(format!("{name} must not be empty")));
    }
    if let Some(p) = probs.iter().find(|p| !(p.is_finite() && **p >= 0.)) {
        return Err(DistError::InvalidParameter(format!(
            "{name} must contain finite non-negative entries, got {p}"
        )));
    }
    let total: f64 = probs.iter().sum();
    if !(total > 0.) || (total - 1.).abs() > SIMPLEX_TOL * probs.len() as f64 {
        return Err(DistError::InvalidParameter(format!(
            "{name} must sum to 1, got {total}"
        )));
    }
    Ok(())
}

/// Index of the first bin whose cumulative weight exceeds `u * total`.
///
/// `u` is in `[0, 1)`. Bins with zero weight are never returned, and no
/// renormalization happens, so `[1, 0]` always maps to the first bin.
pub(crate) fn sample_bin<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let target = rng.random::<f64>() * total;
    let mut cumulative = 0.;
    let mut last_positive = 0;
    for (i, &w) in weights.iter().enumerate() {
        if w <= 0. {
            continue;
        }
        last_positive = i;
        cumulative += w;
        if target < cumulative {
            return i;
        }
    }
    last_positive
}
