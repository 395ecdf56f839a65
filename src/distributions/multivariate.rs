use faer::{Col, Mat};
use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution as _, StandardNormal};
use statrs::function::gamma::{digamma, ln_gamma};

use super::{check_positive, DistError, Distribution, Grad, Result, SIMPLEX_TOL};
use crate::math::{logsumexp, LN_SQRT_2PI};

fn invalid(msg: impl Into<String>) -> DistError {
    DistError::InvalidParameter(msg.into())
}

/// Eigendecomposition `cov = U diag(vals) U^T` of a symmetric positive definite matrix.
struct CovFactor {
    vecs: Mat<f64>,
    vals: Col<f64>,
}

impl CovFactor {
    fn new(mean: &[f64], cov: &Array2<f64>) -> Result<Self> {
        let dim = mean.len();
        if dim == 0 {
            return Err(invalid("mean must not be empty"));
        }
        if cov.shape() != [dim, dim] {
            return Err(DistError::ShapeMismatch(format!(
                "covariance has shape {:?}, expected [{dim}, {dim}]",
                cov.shape()
            )));
        }
        if mean.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
            return Err(invalid("mean and covariance must be finite"));
        }
        let scale = cov.iter().fold(0f64, |acc, v| acc.max(v.abs()));
        for i in 0..dim {
            for j in 0..i {
                if (cov[[i, j]] - cov[[j, i]]).abs() > 1e-10 * scale.max(1.) {
                    return Err(invalid(format!(
                        "covariance must be symmetric, entry ({i}, {j}) differs"
                    )));
                }
            }
        }

        let mat = Mat::from_fn(dim, dim, |i, j| cov[[i, j]]);
        let eig = mat
            .self_adjoint_eigen(faer::Side::Lower)
            .map_err(|err| invalid(format!("covariance decomposition failed: {err:?}")))?;
        let vals = eig.S().column_vector().to_owned();
        if vals.iter().any(|&v| !(v > 0.)) {
            return Err(invalid("covariance must be positive definite"));
        }
        Ok(CovFactor {
            vecs: eig.U().to_owned(),
            vals,
        })
    }

    fn dim(&self) -> usize {
        self.vals.nrows()
    }

    fn log_det(&self) -> f64 {
        self.vals.iter().map(|v| v.ln()).sum()
    }

    fn inv_vals(&self) -> Col<f64> {
        Col::from_fn(self.dim(), |k| self.vals[k].recip())
    }

    /// `cov^{-1} r`
    fn solve(&self, r: &[f64]) -> Vec<f64> {
        let r = Col::from_fn(self.dim(), |i| r[i]);
        let inv = self.inv_vals();
        let w = &self.vecs * (inv.as_diagonal() * (self.vecs.transpose() * &r));
        w.iter().copied().collect()
    }

    /// `U diag(1 / vals) U^T`, symmetrized against rounding in the product.
    fn precision(&self) -> Array2<f64> {
        let p = &self.vecs * self.inv_vals().into_diagonal() * self.vecs.transpose();
        Array2::from_shape_fn((self.dim(), self.dim()), |(i, j)| {
            0.5 * (p[(i, j)] + p[(j, i)])
        })
    }
}

fn residual(x: &[f64], mean: &[f64]) -> Result<Vec<f64>> {
    if x.len() != mean.len() {
        return Err(DistError::ShapeMismatch(format!(
            "value has length {}, mean has length {}",
            x.len(),
            mean.len()
        )));
    }
    Ok(x.iter().zip(mean).map(|(x, m)| x - m).collect())
}

/// Multivariate normal with mean vector and full covariance matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct MvNormal;

impl Distribution for MvNormal {
    type Value = Vec<f64>;
    /// `(mean, cov)`
    type Params = (Vec<f64>, Array2<f64>);

    fn name(&self) -> &'static str {
        "mvnormal"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, (mean, cov): &Self::Params) -> Result<Vec<f64>> {
        let factor = CovFactor::new(mean, cov)?;
        let z = Col::from_fn(factor.dim(), |k| {
            let draw: f64 = StandardNormal.sample(rng);
            draw * factor.vals[k].sqrt()
        });
        let offset = &factor.vecs * z;
        Ok(mean.iter().zip(offset.iter()).map(|(m, o)| m + o).collect())
    }

    fn log_density(&self, x: &Vec<f64>, (mean, cov): &Self::Params) -> Result<f64> {
        let factor = CovFactor::new(mean, cov)?;
        let r = residual(x, mean)?;
        if r.iter().any(|v| !v.is_finite()) {
            return Ok(f64::NEG_INFINITY);
        }
        let w = factor.solve(&r);
        let quad: f64 = r.iter().zip(&w).map(|(a, b)| a * b).sum();
        Ok(-0.5 * quad - 0.5 * factor.log_det() - factor.dim() as f64 * LN_SQRT_2PI)
    }

    fn log_density_grad(&self, x: &Vec<f64>, (mean, cov): &Self::Params) -> Result<Vec<Grad>> {
        let factor = CovFactor::new(mean, cov)?;
        let r = residual(x, mean)?;
        let w = factor.solve(&r);
        let precision = factor.precision();
        let dim = factor.dim();
        let grad_cov =
            Array2::from_shape_fn((dim, dim), |(i, j)| 0.5 * (w[i] * w[j] - precision[[i, j]]));
        Ok(vec![
            Grad::Vector(w.iter().map(|v| -v).collect()),
            Grad::Vector(w),
            Grad::Array(grad_cov.into_dyn()),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}

/// Dirichlet over the open probability simplex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dirichlet;

fn check_concentration(alpha: &[f64]) -> Result<()> {
    if alpha.len() < 2 {
        return Err(invalid(format!(
            "dirichlet needs at least two components, got {}",
            alpha.len()
        )));
    }
    for &a in alpha {
        check_positive("alpha", a)?;
    }
    Ok(())
}

fn check_simplex_len(x: &[f64], alpha: &[f64]) -> Result<()> {
    if x.len() != alpha.len() {
        return Err(DistError::ShapeMismatch(format!(
            "value has length {}, concentration has length {}",
            x.len(),
            alpha.len()
        )));
    }
    Ok(())
}

fn in_open_simplex(x: &[f64]) -> bool {
    let total: f64 = x.iter().sum();
    x.iter().all(|&v| v > 0. && v < 1.) && (total - 1.).abs() <= SIMPLEX_TOL
}

impl Distribution for Dirichlet {
    type Value = Vec<f64>;
    /// concentration
    type Params = Vec<f64>;

    fn name(&self) -> &'static str {
        "dirichlet"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, alpha: &Vec<f64>) -> Result<Vec<f64>> {
        check_concentration(alpha)?;
        // A Gamma(a) draw is Gamma(a + 1) * U^(1/a). Staying in log space keeps small
        // concentrations from underflowing to zero.
        let log_draws = alpha
            .iter()
            .map(|&a| {
                let gamma =
                    rand_distr::Gamma::new(a + 1., 1.).map_err(|e| invalid(e.to_string()))?;
                let u: f64 = rng.random();
                Ok(gamma.sample(rng).ln() + (1. - u).ln() / a)
            })
            .collect::<Result<Vec<f64>>>()?;
        let total = logsumexp(&log_draws);
        let upper = 1f64.next_down();
        Ok(log_draws
            .iter()
            .map(|v| (v - total).exp().clamp(f64::MIN_POSITIVE, upper))
            .collect())
    }

    fn log_density(&self, x: &Vec<f64>, alpha: &Vec<f64>) -> Result<f64> {
        check_concentration(alpha)?;
        check_simplex_len(x, alpha)?;
        if !in_open_simplex(x) {
            return Ok(f64::NEG_INFINITY);
        }
        let total: f64 = alpha.iter().sum();
        let norm = ln_gamma(total) - alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>();
        Ok(norm + x.iter().zip(alpha).map(|(x, a)| (a - 1.) * x.ln()).sum::<f64>())
    }

    fn log_density_grad(&self, x: &Vec<f64>, alpha: &Vec<f64>) -> Result<Vec<Grad>> {
        check_concentration(alpha)?;
        check_simplex_len(x, alpha)?;
        let total = digamma(alpha.iter().sum());
        Ok(vec![
            Grad::Vector(x.iter().zip(alpha).map(|(x, a)| (a - 1.) / x).collect()),
            Grad::Vector(
                x.iter()
                    .zip(alpha)
                    .map(|(x, &a)| total - digamma(a) + x.ln())
                    .collect(),
            ),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::testing::{assert_grad_close, central_diff, check_vector_grad};
    use crate::distributions::Beta;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn example_params() -> (Vec<f64>, Array2<f64>) {
        let mean = vec![0.5, -1.0, 2.0];
        let cov = array![[2.0, 0.3, 0.1], [0.3, 1.0, -0.2], [0.1, -0.2, 0.5]];
        (mean, cov)
    }

    #[test]
    fn mvnormal_matches_univariate_for_diagonal() {
        let mean = vec![1., -2.];
        let cov = array![[4., 0.], [0., 0.25]];
        let x = vec![0.3, -1.7];
        let lp = MvNormal.log_density(&x, &(mean, cov)).unwrap();
        let expected = crate::distributions::Normal.log_density(&0.3, &(1., 2.)).unwrap()
            + crate::distributions::Normal.log_density(&-1.7, &(-2., 0.5)).unwrap();
        assert!((lp - expected).abs() < 1e-12);
    }

    #[test]
    fn mvnormal_cov_gradient_is_symmetric_and_correct() {
        let (mean, cov) = example_params();
        let x = vec![0.1, -0.4, 2.5];
        let grads = MvNormal.log_density_grad(&x, &(mean.clone(), cov.clone())).unwrap();
        let g = grads[2].array().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(g[[i, j]], g[[j, i]]);
            }
        }

        // Perturb (i, j) and (j, i) together to stay on symmetric matrices.
        for i in 0..3 {
            for j in 0..=i {
                let numeric = central_diff(
                    |v| {
                        let mut c = cov.clone();
                        let delta = v - cov[[i, j]];
                        c[[i, j]] += delta;
                        if i != j {
                            c[[j, i]] += delta;
                        }
                        MvNormal.log_density(&x, &(mean.clone(), c)).unwrap()
                    },
                    cov[[i, j]],
                );
                let analytic = if i == j { g[[i, i]] } else { 2. * g[[i, j]] };
                assert_grad_close(analytic, numeric, &format!("cov ({i}, {j})"));
            }
        }

        check_vector_grad(
            |v| MvNormal.log_density(&v.to_vec(), &(mean.clone(), cov.clone())).unwrap(),
            &x,
            grads[0].vector().unwrap(),
            "x",
        );
        check_vector_grad(
            |m| MvNormal.log_density(&x, &(m.to_vec(), cov.clone())).unwrap(),
            &mean,
            grads[1].vector().unwrap(),
            "mean",
        );
    }

    #[test]
    fn mvnormal_rejects_bad_covariance() {
        let mean = vec![0., 0.];
        let x = vec![0., 0.];
        let asym = array![[1., 0.5], [0.2, 1.]];
        assert!(matches!(
            MvNormal.log_density(&x, &(mean.clone(), asym)),
            Err(DistError::InvalidParameter(_))
        ));
        let indefinite = array![[1., 2.], [2., 1.]];
        assert!(MvNormal.log_density(&x, &(mean.clone(), indefinite)).is_err());
        let wrong_shape = array![[1.]];
        assert!(matches!(
            MvNormal.log_density(&x, &(mean.clone(), wrong_shape)),
            Err(DistError::ShapeMismatch(_))
        ));
        assert!(matches!(
            MvNormal.log_density(&vec![0.], &(mean, array![[1., 0.], [0., 1.]])),
            Err(DistError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn mvnormal_sample_covariance() {
        let (mean, cov) = example_params();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let n = 20_000;
        let draws: Vec<Vec<f64>> = (0..n)
            .map(|_| MvNormal.sample(&mut rng, &(mean.clone(), cov.clone())).unwrap())
            .collect();
        for i in 0..3 {
            let m = draws.iter().map(|d| d[i]).sum::<f64>() / n as f64;
            assert!((m - mean[i]).abs() < 0.05, "mean {i}: {m}");
        }
        let c01 = draws
            .iter()
            .map(|d| (d[0] - mean[0]) * (d[1] - mean[1]))
            .sum::<f64>()
            / n as f64;
        assert!((c01 - 0.3).abs() < 0.06, "cov01 {c01}");
    }

    #[test]
    fn dirichlet_support() {
        let alpha = vec![2., 3., 4.];
        let neginf = f64::NEG_INFINITY;
        assert_eq!(Dirichlet.log_density(&vec![0., 0.5, 0.5], &alpha).unwrap(), neginf);
        assert_eq!(Dirichlet.log_density(&vec![-0.1, 0.6, 0.5], &alpha).unwrap(), neginf);
        assert_eq!(Dirichlet.log_density(&vec![1., 0., 0.], &alpha).unwrap(), neginf);
        assert_eq!(Dirichlet.log_density(&vec![0.2, 0.3, 0.4], &alpha).unwrap(), neginf);
        assert!(matches!(
            Dirichlet.log_density(&vec![0.5, 0.5], &alpha),
            Err(DistError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn dirichlet_reference_density() {
        for x in [0.1, 0.35, 0.8] {
            let d = Dirichlet.log_density(&vec![x, 1. - x], &vec![2.5, 1.5]).unwrap();
            let b = Beta.log_density(&x, &(2.5, 1.5)).unwrap();
            assert!((d - b).abs() < 1e-10, "d=2 at {x}");
        }
        // Gamma(9) / (Gamma(2) Gamma(3) Gamma(4)) * 0.2 * 0.3^2 * 0.5^3
        let expected = (3360f64 * 0.2 * 0.09 * 0.125).ln();
        let d = Dirichlet
            .log_density(&vec![0.2, 0.3, 0.5], &vec![2., 3., 4.])
            .unwrap();
        assert!((d - expected).abs() < 1e-10);
    }

    #[test]
    fn dirichlet_grads() {
        let alpha = vec![1.5, 2.5, 0.7];
        let x = vec![0.2, 0.5, 0.3];
        let grads = Dirichlet.log_density_grad(&x, &alpha).unwrap();
        check_vector_grad(
            |a| Dirichlet.log_density(&x, &a.to_vec()).unwrap(),
            &alpha,
            grads[1].vector().unwrap(),
            "alpha",
        );
        // Value gradient in free simplex coordinates.
        let unconstrained = |v: &[f64]| {
            v.iter()
                .zip(&alpha)
                .map(|(v, a)| (a - 1.) * v.ln())
                .sum::<f64>()
        };
        check_vector_grad(unconstrained, &x, grads[0].vector().unwrap(), "x");
    }

    #[test]
    fn dirichlet_samples_on_simplex() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let alpha = vec![0.5, 1., 3.];
        for _ in 0..200 {
            let x = Dirichlet.sample(&mut rng, &alpha).unwrap();
            assert!(Dirichlet.log_density(&x, &alpha).unwrap().is_finite());
        }
        assert!(Dirichlet.sample(&mut rng, &vec![1.]).is_err());
    }

    #[test]
    fn dirichlet_small_concentration_stays_inside_simplex() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let alpha = vec![0.01, 0.01];
        for _ in 0..1000 {
            let x = Dirichlet.sample(&mut rng, &alpha).unwrap();
            assert!(x.iter().all(|&v| v > 0. && v < 1.), "{x:?}");
            assert!(Dirichlet.log_density(&x, &alpha).unwrap().is_finite());
        }
    }
}
