//! Laws used by the change-point model, implemented on the public trait like any
//! user defined distribution would be.

use itertools::Itertools;
use rand::Rng;
use rand_distr::Distribution as _;

use super::{check_finite, DistError, Distribution, Grad, Result};

fn invalid(msg: impl Into<String>) -> DistError {
    DistError::InvalidParameter(msg.into())
}

/// Minimum of `k` independent uniforms on `(lower, upper)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinUniform;

fn check_min_uniform(lower: f64, upper: f64, k: u64) -> Result<()> {
    check_finite("lower", lower)?;
    check_finite("upper", upper)?;
    if !(lower < upper) {
        return Err(invalid(format!(
            "lower must be < upper, got {lower} and {upper}"
        )));
    }
    if k == 0 {
        return Err(invalid("k must be at least 1"));
    }
    Ok(())
}

impl Distribution for MinUniform {
    type Value = f64;
    /// `(lower, upper, k)`
    type Params = (f64, f64, u64);

    fn name(&self) -> &'static str {
        "min_uniform"
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        &(lower, upper, k): &(f64, f64, u64),
    ) -> Result<f64> {
        check_min_uniform(lower, upper, k)?;
        let (first, last) = (lower.next_up(), upper.next_down());
        if !(first <= last) {
            return Err(invalid(format!(
                "no float lies strictly between {lower} and {upper}"
            )));
        }
        let u: f64 = rng.random();
        let x = upper - (upper - lower) * ((-u).ln_1p() / k as f64).exp();
        // Rounding can land on a bound of the open support.
        Ok(x.clamp(first, last))
    }

    fn log_density(&self, &x: &f64, &(lower, upper, k): &(f64, f64, u64)) -> Result<f64> {
        check_min_uniform(lower, upper, k)?;
        if !(x > lower && x < upper) {
            return Ok(f64::NEG_INFINITY);
        }
        let k = k as f64;
        Ok((k - 1.) * (upper - x).ln() + k.ln() - k * (upper - lower).ln())
    }

    fn log_density_grad(
        &self,
        &x: &f64,
        &(lower, upper, k): &(f64, f64, u64),
    ) -> Result<Vec<Grad>> {
        check_min_uniform(lower, upper, k)?;
        let k = k as f64;
        let tail = (k - 1.) / (upper - x);
        let width = k / (upper - lower);
        Ok(vec![
            Grad::Scalar(-tail),
            Grad::Scalar(width),
            Grad::Scalar(tail - width),
            Grad::Undefined,
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true, false]
    }
}

/// Inhomogeneous Poisson process with a piecewise constant rate.
///
/// `bounds` has one entry more than `rates`. Points are returned sorted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiecewisePoissonProcess;

fn check_rates(bounds: &[f64], rates: &[f64]) -> Result<()> {
    if bounds.len() != rates.len() + 1 {
        return Err(invalid(format!(
            "{} bounds need {} rates, got {}",
            bounds.len(),
            bounds.len().saturating_sub(1),
            rates.len()
        )));
    }
    if rates.is_empty() {
        return Err(invalid("at least one interval is required"));
    }
    if let Some(r) = rates.iter().find(|r| !(r.is_finite() && **r >= 0.)) {
        return Err(invalid(format!("rates must be finite and >= 0, got {r}")));
    }
    if let Some(b) = bounds.iter().find(|b| !b.is_finite()) {
        return Err(invalid(format!("bounds must be finite, got {b}")));
    }
    Ok(())
}

fn ascending(bounds: &[f64]) -> bool {
    bounds.iter().tuple_windows().all(|(a, b)| a < b)
}

/// Interval containing `x`; the last interval includes its upper bound.
fn interval(bounds: &[f64], x: f64) -> Option<usize> {
    let n = bounds.len() - 1;
    if !(x >= bounds[0] && x <= bounds[n]) {
        return None;
    }
    Some((bounds.partition_point(|&b| b <= x) - 1).min(n - 1))
}

impl Distribution for PiecewisePoissonProcess {
    type Value = Vec<f64>;
    /// `(bounds, rates)`
    type Params = (Vec<f64>, Vec<f64>);

    fn name(&self) -> &'static str {
        "piecewise_poisson_process"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, (bounds, rates): &Self::Params) -> Result<Vec<f64>> {
        check_rates(bounds, rates)?;
        if !ascending(bounds) {
            return Err(invalid("bounds must be strictly ascending"));
        }
        let mut points = Vec::new();
        for ((&lo, &hi), &rate) in bounds.iter().tuple_windows().zip(rates) {
            let mean = rate * (hi - lo);
            if mean <= 0. {
                continue;
            }
            let poisson = rand_distr::Poisson::new(mean).map_err(|e| invalid(e.to_string()))?;
            let count = poisson.sample(rng) as u64;
            points.extend((0..count).map(|_| rng.random_range(lo..hi)));
        }
        points.sort_by(f64::total_cmp);
        Ok(points)
    }

    fn log_density(&self, points: &Vec<f64>, (bounds, rates): &Self::Params) -> Result<f64> {
        check_rates(bounds, rates)?;
        if !ascending(bounds) {
            return Ok(f64::NEG_INFINITY);
        }
        let mut logp = -bounds
            .iter()
            .tuple_windows()
            .zip(rates)
            .map(|((lo, hi), rate)| (hi - lo) * rate)
            .sum::<f64>();
        for &x in points {
            match interval(bounds, x) {
                Some(i) => logp += rates[i].ln(),
                None => return Ok(f64::NEG_INFINITY),
            }
        }
        Ok(logp)
    }

    fn log_density_grad(&self, points: &Vec<f64>, (bounds, rates): &Self::Params) -> Result<Vec<Grad>> {
        check_rates(bounds, rates)?;
        if !ascending(bounds) {
            return Err(invalid("bounds must be strictly ascending"));
        }
        let mut grad_rates: Vec<f64> = bounds
            .iter()
            .tuple_windows()
            .map(|(lo, hi)| lo - hi)
            .collect();
        for &x in points {
            if let Some(i) = interval(bounds, x) {
                grad_rates[i] += 1. / rates[i];
            }
        }
        let n = rates.len();
        let grad_bounds = (0..=n)
            .map(|j| {
                let below = if j > 0 { rates[j - 1] } else { 0. };
                let above = if j < n { rates[j] } else { 0. };
                above - below
            })
            .collect();
        Ok(vec![
            Grad::Vector(vec![0.; points.len()]),
            Grad::Vector(grad_bounds),
            Grad::Vector(grad_rates),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}
