use rand::Rng;
use rand_distr::Distribution as _;
use statrs::function::factorial::ln_binomial;
use statrs::function::gamma::{digamma, ln_gamma};

use super::{
    check_positive, check_probability, check_probability_vector, sample_bin, DistError,
    Distribution, Grad, Result,
};
use crate::math::{xlog1py, xlogy};

fn invalid(err: impl std::fmt::Display) -> DistError {
    DistError::InvalidParameter(err.to_string())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Bernoulli;

impl Distribution for Bernoulli {
    type Value = bool;
    /// probability of `true`
    type Params = f64;

    fn name(&self) -> &'static str {
        "bernoulli"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &p: &f64) -> Result<bool> {
        check_probability("p", p)?;
        Ok(rng.random::<f64>() < p)
    }

    fn log_density(&self, &x: &bool, &p: &f64) -> Result<f64> {
        check_probability("p", p)?;
        Ok(if x { p.ln() } else { (-p).ln_1p() })
    }

    fn log_density_grad(&self, &x: &bool, &p: &f64) -> Result<Vec<Grad>> {
        check_probability("p", p)?;
        let grad = if x { 1. / p } else { -1. / (1. - p) };
        Ok(vec![Grad::Undefined, Grad::Scalar(grad)])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[false, true]
    }
}

/// Categorical over `1..=probs.len()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Categorical;

impl Distribution for Categorical {
    type Value = i64;
    type Params = Vec<f64>;

    fn name(&self) -> &'static str {
        "categorical"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, probs: &Vec<f64>) -> Result<i64> {
        check_probability_vector("probs", probs)?;
        Ok(sample_bin(rng, probs) as i64 + 1)
    }

    fn log_density(&self, &x: &i64, probs: &Vec<f64>) -> Result<f64> {
        check_probability_vector("probs", probs)?;
        if x < 1 || x as usize > probs.len() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(probs[x as usize - 1].ln())
    }

    fn log_density_grad(&self, &x: &i64, probs: &Vec<f64>) -> Result<Vec<Grad>> {
        check_probability_vector("probs", probs)?;
        let mut grad = vec![0.; probs.len()];
        if x >= 1 && (x as usize) <= probs.len() {
            grad[x as usize - 1] = 1. / probs[x as usize - 1];
        }
        Ok(vec![Grad::Undefined, Grad::Vector(grad)])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[false, true]
    }
}

/// Uniform over the integers `low..=high`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformDiscrete;

fn check_int_range(low: i64, high: i64) -> Result<()> {
    if low > high {
        return Err(DistError::InvalidParameter(format!(
            "low must be <= high, got {low}..={high}"
        )));
    }
    Ok(())
}

impl Distribution for UniformDiscrete {
    type Value = i64;
    /// `(low, high)`, both inclusive
    type Params = (i64, i64);

    fn name(&self) -> &'static str {
        "uniform_discrete"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(low, high): &(i64, i64)) -> Result<i64> {
        check_int_range(low, high)?;
        Ok(rng.random_range(low..=high))
    }

    fn log_density(&self, &x: &i64, &(low, high): &(i64, i64)) -> Result<f64> {
        check_int_range(low, high)?;
        if x < low || x > high {
            return Ok(f64::NEG_INFINITY);
        }
        let count = i128::from(high) - i128::from(low) + 1;
        Ok(-(count as f64).ln())
    }

    fn log_density_grad(&self, _x: &i64, &(low, high): &(i64, i64)) -> Result<Vec<Grad>> {
        check_int_range(low, high)?;
        Ok(vec![Grad::Undefined, Grad::Undefined, Grad::Undefined])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[false, false, false]
    }
}

/// Number of failures before the first success.
#[derive(Debug, Clone, Copy, Default)]
pub struct Geometric;

fn check_success_prob(p: f64) -> Result<()> {
    if !(p > 0. && p <= 1.) {
        return Err(DistError::InvalidParameter(format!(
            "p must be in (0, 1], got {p}"
        )));
    }
    Ok(())
}

impl Distribution for Geometric {
    type Value = i64;
    /// success probability
    type Params = f64;

    fn name(&self) -> &'static str {
        "geometric"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &p: &f64) -> Result<i64> {
        check_success_prob(p)?;
        let dist = rand_distr::Geometric::new(p).map_err(invalid)?;
        Ok(dist.sample(rng).min(i64::MAX as u64) as i64)
    }

    fn log_density(&self, &x: &i64, &p: &f64) -> Result<f64> {
        check_success_prob(p)?;
        if x < 0 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(p.ln() + xlog1py(x as f64, -p))
    }

    fn log_density_grad(&self, &x: &i64, &p: &f64) -> Result<Vec<Grad>> {
        check_success_prob(p)?;
        Ok(vec![
            Grad::Undefined,
            Grad::Scalar(1. / p - x as f64 / (1. - p)),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[false, true]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Binomial;

impl Distribution for Binomial {
    type Value = i64;
    /// `(n, p)`
    type Params = (u64, f64);

    fn name(&self) -> &'static str {
        "binomial"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(n, p): &(u64, f64)) -> Result<i64> {
        check_probability("p", p)?;
        let dist = rand_distr::Binomial::new(n, p).map_err(invalid)?;
        Ok(dist.sample(rng) as i64)
    }

    fn log_density(&self, &x: &i64, &(n, p): &(u64, f64)) -> Result<f64> {
        check_probability("p", p)?;
        if x < 0 || x as u64 > n {
            return Ok(f64::NEG_INFINITY);
        }
        let k = x as f64;
        Ok(ln_binomial(n, x as u64) + xlogy(k, p) + xlog1py(n as f64 - k, -p))
    }

    fn log_density_grad(&self, &x: &i64, &(n, p): &(u64, f64)) -> Result<Vec<Grad>> {
        check_probability("p", p)?;
        let k = x as f64;
        Ok(vec![
            Grad::Undefined,
            Grad::Undefined,
            Grad::Scalar(k / p - (n as f64 - k) / (1. - p)),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[false, false, true]
    }
}

/// Failures before the `r`-th success, `r` real and positive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegativeBinomial;

impl Distribution for NegativeBinomial {
    type Value = i64;
    /// `(r, p)`
    type Params = (f64, f64);

    fn name(&self) -> &'static str {
        "neg_binom"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(r, p): &(f64, f64)) -> Result<i64> {
        check_positive("r", r)?;
        check_success_prob(p)?;
        if p == 1. {
            return Ok(0);
        }
        // Gamma-Poisson mixture.
        let gamma = rand_distr::Gamma::new(r, (1. - p) / p).map_err(invalid)?;
        let rate: f64 = gamma.sample(rng);
        if !(rate > 0.) {
            return Ok(0);
        }
        let poisson = rand_distr::Poisson::new(rate).map_err(invalid)?;
        Ok(poisson.sample(rng) as i64)
    }

    fn log_density(&self, &x: &i64, &(r, p): &(f64, f64)) -> Result<f64> {
        check_positive("r", r)?;
        check_success_prob(p)?;
        if x < 0 {
            return Ok(f64::NEG_INFINITY);
        }
        let k = x as f64;
        Ok(ln_gamma(k + r) - ln_gamma(r) - ln_gamma(k + 1.) + r * p.ln() + xlog1py(k, -p))
    }

    fn log_density_grad(&self, &x: &i64, &(r, p): &(f64, f64)) -> Result<Vec<Grad>> {
        check_positive("r", r)?;
        check_success_prob(p)?;
        let k = x as f64;
        Ok(vec![
            Grad::Undefined,
            Grad::Scalar(digamma(k + r) - digamma(r) + p.ln()),
            Grad::Scalar(r / p - k / (1. - p)),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[false, true, true]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Poisson;

impl Distribution for Poisson {
    type Value = i64;
    /// rate
    type Params = f64;

    fn name(&self) -> &'static str {
        "poisson"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &rate: &f64) -> Result<i64> {
        check_positive("rate", rate)?;
        let dist = rand_distr::Poisson::new(rate).map_err(invalid)?;
        Ok(dist.sample(rng) as i64)
    }

    fn log_density(&self, &x: &i64, &rate: &f64) -> Result<f64> {
        check_positive("rate", rate)?;
        if x < 0 {
            return Ok(f64::NEG_INFINITY);
        }
        let k = x as f64;
        Ok(k * rate.ln() - rate - ln_gamma(k + 1.))
    }

    fn log_density_grad(&self, &x: &i64, &rate: &f64) -> Result<Vec<Grad>> {
        check_positive("rate", rate)?;
        Ok(vec![Grad::Undefined, Grad::Scalar(x as f64 / rate - 1.)])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[false, true]
    }
}
