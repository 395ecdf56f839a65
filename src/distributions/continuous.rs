use itertools::Itertools;
use rand::Rng;
use rand_distr::Distribution as _;
use statrs::function::gamma::{digamma, ln_gamma};

use super::{
    check_finite, check_positive, check_probability, check_probability_vector, sample_bin,
    DistError, Distribution, Grad, Result,
};
use crate::math::{ln_beta, logaddexp, sign, LN_SQRT_2PI};

fn invalid(err: impl std::fmt::Display) -> DistError {
    DistError::InvalidParameter(err.to_string())
}

/// Keep draws strictly inside `(0, 1)` when the sampler rounds onto a boundary.
fn clamp_open_unit(x: f64) -> f64 {
    x.clamp(f64::MIN_POSITIVE, 1. - f64::EPSILON / 2.)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normal;

impl Distribution for Normal {
    type Value = f64;
    /// `(mean, std)`
    type Params = (f64, f64);

    fn name(&self) -> &'static str {
        "normal"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(mean, std): &(f64, f64)) -> Result<f64> {
        check_finite("mean", mean)?;
        check_positive("std", std)?;
        let normal = rand_distr::Normal::new(mean, std).map_err(invalid)?;
        Ok(normal.sample(rng))
    }

    fn log_density(&self, &x: &f64, &(mean, std): &(f64, f64)) -> Result<f64> {
        check_finite("mean", mean)?;
        check_positive("std", std)?;
        if !x.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        let z = (x - mean) / std;
        Ok(-0.5 * z * z - std.ln() - LN_SQRT_2PI)
    }

    fn log_density_grad(&self, &x: &f64, &(mean, std): &(f64, f64)) -> Result<Vec<Grad>> {
        check_finite("mean", mean)?;
        check_positive("std", std)?;
        let z = (x - mean) / std;
        Ok(vec![
            Grad::Scalar(-z / std),
            Grad::Scalar(z / std),
            Grad::Scalar((z * z - 1.) / std),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Beta;

fn check_beta(alpha: f64, beta: f64) -> Result<()> {
    check_positive("alpha", alpha)?;
    check_positive("beta", beta)
}

impl Distribution for Beta {
    type Value = f64;
    /// `(alpha, beta)`
    type Params = (f64, f64);

    fn name(&self) -> &'static str {
        "beta"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(alpha, beta): &(f64, f64)) -> Result<f64> {
        check_beta(alpha, beta)?;
        let dist = rand_distr::Beta::new(alpha, beta).map_err(invalid)?;
        Ok(clamp_open_unit(dist.sample(rng)))
    }

    fn log_density(&self, &x: &f64, &(alpha, beta): &(f64, f64)) -> Result<f64> {
        check_beta(alpha, beta)?;
        // The support is open: exactly 0 or 1 is outside it, whatever the shapes are.
        if !(x > 0. && x < 1.) {
            return Ok(f64::NEG_INFINITY);
        }
        Ok((alpha - 1.) * x.ln() + (beta - 1.) * (-x).ln_1p() - ln_beta(alpha, beta))
    }

    fn log_density_grad(&self, &x: &f64, &(alpha, beta): &(f64, f64)) -> Result<Vec<Grad>> {
        check_beta(alpha, beta)?;
        let dab = digamma(alpha + beta);
        Ok(vec![
            Grad::Scalar((alpha - 1.) / x - (beta - 1.) / (1. - x)),
            Grad::Scalar(x.ln() - digamma(alpha) + dab),
            Grad::Scalar((-x).ln_1p() - digamma(beta) + dab),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

/// Gamma with shape and scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gamma;

impl Distribution for Gamma {
    type Value = f64;
    /// `(shape, scale)`
    type Params = (f64, f64);

    fn name(&self) -> &'static str {
        "gamma"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(shape, scale): &(f64, f64)) -> Result<f64> {
        check_positive("shape", shape)?;
        check_positive("scale", scale)?;
        let dist = rand_distr::Gamma::new(shape, scale).map_err(invalid)?;
        Ok(dist.sample(rng).max(f64::MIN_POSITIVE))
    }

    fn log_density(&self, &x: &f64, &(shape, scale): &(f64, f64)) -> Result<f64> {
        check_positive("shape", shape)?;
        check_positive("scale", scale)?;
        if !(x > 0. && x.is_finite()) {
            return Ok(f64::NEG_INFINITY);
        }
        Ok((shape - 1.) * x.ln() - x / scale - ln_gamma(shape) - shape * scale.ln())
    }

    fn log_density_grad(&self, &x: &f64, &(shape, scale): &(f64, f64)) -> Result<Vec<Grad>> {
        check_positive("shape", shape)?;
        check_positive("scale", scale)?;
        Ok(vec![
            Grad::Scalar((shape - 1.) / x - 1. / scale),
            Grad::Scalar(x.ln() - digamma(shape) - scale.ln()),
            Grad::Scalar(x / (scale * scale) - shape / scale),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

/// Inverse gamma with shape and scale: `p(x) ∝ x^(-shape-1) exp(-scale / x)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InverseGamma;

impl Distribution for InverseGamma {
    type Value = f64;
    /// `(shape, scale)`
    type Params = (f64, f64);

    fn name(&self) -> &'static str {
        "inv_gamma"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(shape, scale): &(f64, f64)) -> Result<f64> {
        check_positive("shape", shape)?;
        check_positive("scale", scale)?;
        let dist = rand_distr::Gamma::new(shape, 1. / scale).map_err(invalid)?;
        let draw = dist.sample(rng).max(f64::MIN_POSITIVE);
        Ok((1. / draw).min(f64::MAX))
    }

    fn log_density(&self, &x: &f64, &(shape, scale): &(f64, f64)) -> Result<f64> {
        check_positive("shape", shape)?;
        check_positive("scale", scale)?;
        if !(x > 0. && x.is_finite()) {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(shape * scale.ln() - ln_gamma(shape) - (shape + 1.) * x.ln() - scale / x)
    }

    fn log_density_grad(&self, &x: &f64, &(shape, scale): &(f64, f64)) -> Result<Vec<Grad>> {
        check_positive("shape", shape)?;
        check_positive("scale", scale)?;
        Ok(vec![
            Grad::Scalar(-(shape + 1.) / x + scale / (x * x)),
            Grad::Scalar(scale.ln() - digamma(shape) - x.ln()),
            Grad::Scalar(shape / scale - 1. / x),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Exponential;

impl Distribution for Exponential {
    type Value = f64;
    /// rate
    type Params = f64;

    fn name(&self) -> &'static str {
        "exponential"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &rate: &f64) -> Result<f64> {
        check_positive("rate", rate)?;
        let dist = rand_distr::Exp::new(rate).map_err(invalid)?;
        Ok(dist.sample(rng).max(f64::MIN_POSITIVE))
    }

    fn log_density(&self, &x: &f64, &rate: &f64) -> Result<f64> {
        check_positive("rate", rate)?;
        if !(x > 0. && x.is_finite()) {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(rate.ln() - rate * x)
    }

    fn log_density_grad(&self, &x: &f64, &rate: &f64) -> Result<Vec<Grad>> {
        check_positive("rate", rate)?;
        Ok(vec![Grad::Scalar(-rate), Grad::Scalar(1. / rate - x)])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Laplace;

impl Distribution for Laplace {
    type Value = f64;
    /// `(loc, scale)`
    type Params = (f64, f64);

    fn name(&self) -> &'static str {
        "laplace"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(loc, scale): &(f64, f64)) -> Result<f64> {
        check_finite("loc", loc)?;
        check_positive("scale", scale)?;
        // Inverse CDF on u in (-1/2, 1/2).
        let u: f64 = rng.random::<f64>() - 0.5;
        let tail = (1. - 2. * u.abs()).max(f64::MIN_POSITIVE);
        Ok(loc - scale * sign(u) * tail.ln())
    }

    fn log_density(&self, &x: &f64, &(loc, scale): &(f64, f64)) -> Result<f64> {
        check_finite("loc", loc)?;
        check_positive("scale", scale)?;
        if !x.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(-(2. * scale).ln() - (x - loc).abs() / scale)
    }

    fn log_density_grad(&self, &x: &f64, &(loc, scale): &(f64, f64)) -> Result<Vec<Grad>> {
        check_finite("loc", loc)?;
        check_positive("scale", scale)?;
        let s = sign(x - loc);
        Ok(vec![
            Grad::Scalar(-s / scale),
            Grad::Scalar(s / scale),
            Grad::Scalar(-1. / scale + (x - loc).abs() / (scale * scale)),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Cauchy;

impl Distribution for Cauchy {
    type Value = f64;
    /// `(loc, scale)`
    type Params = (f64, f64);

    fn name(&self) -> &'static str {
        "cauchy"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(loc, scale): &(f64, f64)) -> Result<f64> {
        check_finite("loc", loc)?;
        check_positive("scale", scale)?;
        let dist = rand_distr::Cauchy::new(loc, scale).map_err(invalid)?;
        Ok(dist.sample(rng))
    }

    fn log_density(&self, &x: &f64, &(loc, scale): &(f64, f64)) -> Result<f64> {
        check_finite("loc", loc)?;
        check_positive("scale", scale)?;
        if !x.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        let z = (x - loc) / scale;
        Ok(-std::f64::consts::PI.ln() - scale.ln() - (z * z).ln_1p())
    }

    fn log_density_grad(&self, &x: &f64, &(loc, scale): &(f64, f64)) -> Result<Vec<Grad>> {
        check_finite("loc", loc)?;
        check_positive("scale", scale)?;
        let z = (x - loc) / scale;
        let denom = scale * (1. + z * z);
        Ok(vec![
            Grad::Scalar(-2. * z / denom),
            Grad::Scalar(2. * z / denom),
            Grad::Scalar(-1. / scale + 2. * z * z / denom),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

/// Continuous uniform on the closed interval `[low, high]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

fn check_interval(low: f64, high: f64) -> Result<()> {
    check_finite("low", low)?;
    check_finite("high", high)?;
    if !(low < high) {
        return Err(DistError::InvalidParameter(format!(
            "low must be < high, got [{low}, {high}]"
        )));
    }
    Ok(())
}

impl Distribution for Uniform {
    type Value = f64;
    /// `(low, high)`
    type Params = (f64, f64);

    fn name(&self) -> &'static str {
        "uniform"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, &(low, high): &(f64, f64)) -> Result<f64> {
        check_interval(low, high)?;
        let u: f64 = rng.random();
        Ok((low + (high - low) * u).min(high))
    }

    fn log_density(&self, &x: &f64, &(low, high): &(f64, f64)) -> Result<f64> {
        check_interval(low, high)?;
        if !(low..=high).contains(&x) {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(-(high - low).ln())
    }

    fn log_density_grad(&self, _x: &f64, &(low, high): &(f64, f64)) -> Result<Vec<Grad>> {
        check_interval(low, high)?;
        let inv_width = 1. / (high - low);
        Ok(vec![
            Grad::Scalar(0.),
            Grad::Scalar(inv_width),
            Grad::Scalar(-inv_width),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

/// Uniform within each bin `[bounds[i], bounds[i+1])`, bin `i` chosen with `probs[i]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiecewiseUniform;

fn check_piecewise(bounds: &[f64], probs: &[f64]) -> Result<()> {
    if bounds.len() != probs.len() + 1 {
        return Err(DistError::InvalidParameter(format!(
            "need one more bound than probabilities, got {} bounds and {} probabilities",
            bounds.len(),
            probs.len()
        )));
    }
    if bounds.iter().any(|b| !b.is_finite()) || !bounds.iter().tuple_windows().all(|(a, b)| a < b)
    {
        return Err(DistError::InvalidParameter(
            "bounds must be finite and strictly ascending".into(),
        ));
    }
    check_probability_vector("probs", probs)
}

/// Bin containing `x`; the last bound belongs to no bin.
fn find_bin(bounds: &[f64], x: f64) -> Option<usize> {
    let last = *bounds.last()?;
    if !(x >= bounds[0] && x < last) {
        return None;
    }
    Some(bounds.partition_point(|&b| b <= x) - 1)
}

impl Distribution for PiecewiseUniform {
    type Value = f64;
    /// `(bounds, probs)`
    type Params = (Vec<f64>, Vec<f64>);

    fn name(&self) -> &'static str {
        "piecewise_uniform"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, (bounds, probs): &Self::Params) -> Result<f64> {
        check_piecewise(bounds, probs)?;
        let bin = sample_bin(rng, probs);
        let (lo, hi) = (bounds[bin], bounds[bin + 1]);
        let x = lo + (hi - lo) * rng.random::<f64>();
        // Rounding may land on the open upper end of the bin.
        Ok(if x < hi { x } else { lo })
    }

    fn log_density(&self, &x: &f64, (bounds, probs): &Self::Params) -> Result<f64> {
        check_piecewise(bounds, probs)?;
        match find_bin(bounds, x) {
            Some(bin) => Ok(probs[bin].ln() - (bounds[bin + 1] - bounds[bin]).ln()),
            None => Ok(f64::NEG_INFINITY),
        }
    }

    fn log_density_grad(&self, &x: &f64, (bounds, probs): &Self::Params) -> Result<Vec<Grad>> {
        check_piecewise(bounds, probs)?;
        let mut grad_bounds = vec![0.; bounds.len()];
        let mut grad_probs = vec![0.; probs.len()];
        if let Some(bin) = find_bin(bounds, x) {
            let inv_width = 1. / (bounds[bin + 1] - bounds[bin]);
            grad_bounds[bin] = inv_width;
            grad_bounds[bin + 1] = -inv_width;
            grad_probs[bin] = 1. / probs[bin];
        }
        Ok(vec![
            Grad::Scalar(0.),
            Grad::Vector(grad_bounds),
            Grad::Vector(grad_probs),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

/// Mixture `theta * Beta(alpha, beta) + (1 - theta) * Uniform(0, 1)` on `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BetaUniformMixture;

impl Distribution for BetaUniformMixture {
    type Value = f64;
    /// `(theta, alpha, beta)`
    type Params = (f64, f64, f64);

    fn name(&self) -> &'static str {
        "beta_uniform"
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        &(theta, alpha, beta): &(f64, f64, f64),
    ) -> Result<f64> {
        check_probability("theta", theta)?;
        if rng.random::<f64>() < theta {
            Beta.sample(rng, &(alpha, beta))
        } else {
            check_beta(alpha, beta)?;
            Ok(rng.random::<f64>())
        }
    }

    fn log_density(&self, &x: &f64, &(theta, alpha, beta): &(f64, f64, f64)) -> Result<f64> {
        check_probability("theta", theta)?;
        check_beta(alpha, beta)?;
        if !(0. ..=1.).contains(&x) {
            return Ok(f64::NEG_INFINITY);
        }
        let beta_part = theta.ln() + Beta.log_density(&x, &(alpha, beta))?;
        let uniform_part = (-theta).ln_1p();
        Ok(logaddexp(beta_part, uniform_part))
    }

    fn log_density_grad(
        &self,
        &x: &f64,
        &(theta, alpha, beta): &(f64, f64, f64),
    ) -> Result<Vec<Grad>> {
        check_probability("theta", theta)?;
        check_beta(alpha, beta)?;
        let beta_lp = Beta.log_density(&x, &(alpha, beta))?;
        let total = self.log_density(&x, &(theta, alpha, beta))?;
        // Responsibility of the beta component.
        let resp = (theta.ln() + beta_lp - total).exp();
        let beta_grads = Beta.log_density_grad(&x, &(alpha, beta))?;
        // At the ends of [0, 1] the beta part vanishes while its gradients blow up.
        let component = |g: &Grad| match g.scalar() {
            Some(g) if resp != 0. => resp * g,
            _ => 0.,
        };
        Ok(vec![
            Grad::Scalar(component(&beta_grads[0])),
            Grad::Scalar((beta_lp.exp() - 1.) / total.exp()),
            Grad::Scalar(component(&beta_grads[1])),
            Grad::Scalar(component(&beta_grads[2])),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true, true]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::testing::{assert_grad_close, central_diff, check_vector_grad};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Check every scalar gradient slot of a two parameter law against central differences.
    fn check_two_param<D>(dist: &D, x: f64, a: f64, b: f64)
    where
        D: Distribution<Value = f64, Params = (f64, f64)>,
    {
        let grads = dist.log_density_grad(&x, &(a, b)).unwrap();
        let lp = |x: f64, a: f64, b: f64| dist.log_density(&x, &(a, b)).unwrap();
        let numeric = [
            central_diff(|v| lp(v, a, b), x),
            central_diff(|v| lp(x, v, b), a),
            central_diff(|v| lp(x, a, v), b),
        ];
        for (i, (g, n)) in grads.iter().zip(numeric).enumerate() {
            assert_grad_close(g.scalar().unwrap(), n, &format!("{} slot {i}", dist.name()));
        }
    }

    proptest! {
        #[test]
        fn normal_grad(x in -5f64..5., mean in -3f64..3., std in 0.2f64..4.) {
            check_two_param(&Normal, x, mean, std);
        }

        #[test]
        fn beta_grad(x in 0.05f64..0.95, a in 0.3f64..6., b in 0.3f64..6.) {
            check_two_param(&Beta, x, a, b);
        }

        #[test]
        fn gamma_grad(x in 0.1f64..10., shape in 0.3f64..8., scale in 0.2f64..5.) {
            check_two_param(&Gamma, x, shape, scale);
        }

        #[test]
        fn inv_gamma_grad(x in 0.2f64..10., shape in 0.3f64..8., scale in 0.2f64..5.) {
            check_two_param(&InverseGamma, x, shape, scale);
        }

        #[test]
        fn laplace_grad(x in -5f64..5., loc in -3f64..3., scale in 0.2f64..4.) {
            prop_assume!((x - loc).abs() > 1e-3);
            check_two_param(&Laplace, x, loc, scale);
        }

        #[test]
        fn cauchy_grad(x in -5f64..5., loc in -3f64..3., scale in 0.2f64..4.) {
            check_two_param(&Cauchy, x, loc, scale);
        }

        #[test]
        fn uniform_grad(x in 0.1f64..0.9, low in -3f64..0., high in 1f64..4.) {
            check_two_param(&Uniform, x, low, high);
        }

        #[test]
        fn exponential_grad(x in 0.1f64..5., rate in 0.1f64..5.) {
            let grads = Exponential.log_density_grad(&x, &rate).unwrap();
            let lp = |x: f64, r: f64| Exponential.log_density(&x, &r).unwrap();
            assert_grad_close(grads[0].scalar().unwrap(), central_diff(|v| lp(v, rate), x), "x");
            assert_grad_close(grads[1].scalar().unwrap(), central_diff(|v| lp(x, v), rate), "rate");
        }

        #[test]
        fn beta_uniform_grad(x in 0.05f64..0.95, theta in 0.1f64..0.9, a in 0.5f64..5., b in 0.5f64..5.) {
            let d = BetaUniformMixture;
            let grads = d.log_density_grad(&x, &(theta, a, b)).unwrap();
            let lp = |x: f64, t: f64, a: f64, b: f64| d.log_density(&x, &(t, a, b)).unwrap();
            let numeric = [
                central_diff(|v| lp(v, theta, a, b), x),
                central_diff(|v| lp(x, v, a, b), theta),
                central_diff(|v| lp(x, theta, v, b), a),
                central_diff(|v| lp(x, theta, a, v), b),
            ];
            for (g, n) in grads.iter().zip(numeric) {
                assert_grad_close(g.scalar().unwrap(), n, "beta_uniform");
            }
        }
    }

    #[test]
    fn normal_extreme_deviation_stays_finite() {
        let lp = Normal.log_density(&1e13, &(0., 1.)).unwrap();
        assert_eq!(lp, -5e25);
        let grads = Normal.log_density_grad(&1e13, &(0., 1.)).unwrap();
        assert_eq!(
            grads,
            vec![Grad::Scalar(-1e13), Grad::Scalar(1e13), Grad::Scalar(1e26)]
        );
    }

    #[test]
    fn out_of_support_is_neg_infinity() {
        assert_eq!(Gamma.log_density(&-1., &(1., 1.)).unwrap(), f64::NEG_INFINITY);
        assert_eq!(Gamma.log_density(&0., &(0.5, 1.)).unwrap(), f64::NEG_INFINITY);
        assert_eq!(InverseGamma.log_density(&0., &(2., 1.)).unwrap(), f64::NEG_INFINITY);
        assert_eq!(Exponential.log_density(&-0.1, &2.).unwrap(), f64::NEG_INFINITY);
        assert_eq!(Exponential.log_density(&0., &2.).unwrap(), f64::NEG_INFINITY);
        assert_eq!(Uniform.log_density(&2.5, &(0., 2.)).unwrap(), f64::NEG_INFINITY);
        assert_eq!(
            BetaUniformMixture.log_density(&1.5, &(0.5, 2., 2.)).unwrap(),
            f64::NEG_INFINITY
        );
        assert_eq!(Normal.log_density(&f64::INFINITY, &(0., 1.)).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn beta_boundaries_are_neg_infinity() {
        for (a, b) in [(0.5, 0.5), (1., 1.), (2., 3.), (1., 0.3)] {
            for x in [0., 1.] {
                let lp = Beta.log_density(&x, &(a, b)).unwrap();
                assert_eq!(lp, f64::NEG_INFINITY, "x={x} a={a} b={b}");
            }
            // The limit from inside the support dominates the boundary value.
            let inner = Beta.log_density(&1e-12, &(a, b)).unwrap();
            assert!(inner.is_finite() && inner > f64::NEG_INFINITY);
        }
    }

    #[test]
    fn mixture_grads_at_unit_interval_ends() {
        let theta = 0.4;
        for x in [0., 1.] {
            let lp = BetaUniformMixture.log_density(&x, &(theta, 2., 3.)).unwrap();
            assert_eq!(lp, (-theta).ln_1p());
            let grads = BetaUniformMixture.log_density_grad(&x, &(theta, 2., 3.)).unwrap();
            let grads: Vec<f64> = grads.iter().map(|g| g.scalar().unwrap()).collect();
            assert_eq!(grads[0], 0., "x={x}");
            assert_grad_close(grads[1], -1. / (1. - theta), "mixture theta at boundary");
            assert_eq!(grads[2], 0., "x={x}");
            assert_eq!(grads[3], 0., "x={x}");
        }
    }

    #[test]
    fn closed_uniform_includes_endpoints() {
        assert_eq!(Uniform.log_density(&0., &(0., 2.)).unwrap(), -(2f64.ln()));
        assert_eq!(Uniform.log_density(&2., &(0., 2.)).unwrap(), -(2f64.ln()));
    }

    #[test]
    fn invalid_parameters_are_errors() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            Normal.sample(&mut rng, &(0., -1.)),
            Err(DistError::InvalidParameter(_))
        ));
        assert!(Gamma.sample(&mut rng, &(0., 1.)).is_err());
        assert!(Beta.log_density(&0.5, &(-1., 1.)).is_err());
        assert!(Uniform.sample(&mut rng, &(1., 1.)).is_err());
        assert!(Exponential.log_density_grad(&1., &0.).is_err());
        assert!(BetaUniformMixture.sample(&mut rng, &(1.5, 1., 1.)).is_err());
    }

    #[test]
    fn samples_stay_in_support() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..500 {
            let x = Beta.sample(&mut rng, &(0.05, 0.05)).unwrap();
            assert!(Beta.log_density(&x, &(0.05, 0.05)).unwrap().is_finite());
            let g = Gamma.sample(&mut rng, &(0.05, 1.)).unwrap();
            assert!(g > 0.);
            let ig = InverseGamma.sample(&mut rng, &(3., 2.)).unwrap();
            assert!(ig > 0. && ig.is_finite());
            let u = Uniform.sample(&mut rng, &(-1., 1.)).unwrap();
            assert!((-1. ..=1.).contains(&u));
            let l = Laplace.sample(&mut rng, &(0., 1.)).unwrap();
            assert!(l.is_finite());
        }
    }

    #[test]
    fn gamma_sample_moments() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 20_000;
        let draws: Vec<f64> = (0..n)
            .map(|_| Gamma.sample(&mut rng, &(3., 2.)).unwrap())
            .collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        assert!((mean - 6.).abs() < 0.15, "mean {mean}");
    }

    #[test]
    fn piecewise_uniform_density_and_grads() {
        let bounds = vec![0., 1., 3.];
        let probs = vec![0.25, 0.75];
        let params = (bounds.clone(), probs.clone());
        let lp = PiecewiseUniform.log_density(&2., &params).unwrap();
        assert!((lp - (0.75f64 / 2.).ln()).abs() < 1e-12);
        assert_eq!(
            PiecewiseUniform.log_density(&3., &params).unwrap(),
            f64::NEG_INFINITY
        );
        assert_eq!(
            PiecewiseUniform.log_density(&-0.5, &params).unwrap(),
            f64::NEG_INFINITY
        );

        let grads = PiecewiseUniform.log_density_grad(&2., &params).unwrap();
        check_vector_grad(
            |b| {
                PiecewiseUniform
                    .log_density(&2., &(b.to_vec(), probs.clone()))
                    .unwrap()
            },
            &bounds,
            grads[1].vector().unwrap(),
            "bounds",
        );
        assert_eq!(grads[2].vector().unwrap(), &[0., 1. / 0.75]);

        assert!(PiecewiseUniform
            .log_density(&0.5, &(vec![0., 1.], probs.clone()))
            .is_err());
        assert!(PiecewiseUniform
            .log_density(&0.5, &(vec![0., 2., 1.], probs))
            .is_err());
    }
}
