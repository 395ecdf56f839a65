//! Jacobians of the continuous part of an involution.
//!
//! A move describes its coordinate change once, generically over [`Scalar`], and a
//! [`Differentiator`] turns it into a Jacobian matrix: from a hand written formula,
//! by forward mode dual numbers, or by central differences.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use faer::Mat;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JacobianError {
    #[error("transform has no analytic jacobian")]
    NoAnalyticJacobian,
    #[error("jacobian has shape {rows}x{cols}, expected a square matrix")]
    NotSquare { rows: usize, cols: usize },
    #[error("jacobian contains non-finite entries")]
    NonFinite,
}

/// Number types a coordinate transform can be evaluated on.
pub trait Scalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    fn constant(value: f64) -> Self;
    fn value(self) -> f64;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
}

impl Scalar for f64 {
    fn constant(value: f64) -> Self {
        value
    }

    fn value(self) -> f64 {
        self
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn ln(self) -> Self {
        f64::ln(self)
    }
}

/// A value with one directional derivative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual {
    pub re: f64,
    pub eps: f64,
}

impl Dual {
    pub fn variable(re: f64) -> Self {
        Dual { re, eps: 1. }
    }
}

impl Add for Dual {
    type Output = Dual;

    fn add(self, rhs: Dual) -> Dual {
        Dual {
            re: self.re + rhs.re,
            eps: self.eps + rhs.eps,
        }
    }
}

impl Sub for Dual {
    type Output = Dual;

    fn sub(self, rhs: Dual) -> Dual {
        Dual {
            re: self.re - rhs.re,
            eps: self.eps - rhs.eps,
        }
    }
}

impl Mul for Dual {
    type Output = Dual;

    fn mul(self, rhs: Dual) -> Dual {
        Dual {
            re: self.re * rhs.re,
            eps: self.eps * rhs.re + self.re * rhs.eps,
        }
    }
}

impl Div for Dual {
    type Output = Dual;

    fn div(self, rhs: Dual) -> Dual {
        Dual {
            re: self.re / rhs.re,
            eps: (self.eps * rhs.re - self.re * rhs.eps) / (rhs.re * rhs.re),
        }
    }
}

impl Neg for Dual {
    type Output = Dual;

    fn neg(self) -> Dual {
        Dual {
            re: -self.re,
            eps: -self.eps,
        }
    }
}

impl Scalar for Dual {
    fn constant(value: f64) -> Self {
        Dual { re: value, eps: 0. }
    }

    fn value(self) -> f64 {
        self.re
    }

    fn exp(self) -> Self {
        let re = self.re.exp();
        Dual {
            re,
            eps: self.eps * re,
        }
    }

    fn ln(self) -> Self {
        Dual {
            re: self.re.ln(),
            eps: self.eps / self.re,
        }
    }
}

/// A differentiable map between coordinate vectors of equal length.
pub trait CoordinateTransform {
    fn dim(&self) -> usize;

    fn apply<S: Scalar>(&self, x: &[S]) -> Vec<S>;

    /// Hand derived Jacobian, if the transform has one.
    fn jacobian(&self, _x: &[f64]) -> Option<Mat<f64>> {
        None
    }
}

pub trait Differentiator: Send + Sync {
    fn jacobian<C: CoordinateTransform>(&self, transform: &C, x: &[f64]) -> Result<Mat<f64>, JacobianError>;

    fn log_abs_det<C: CoordinateTransform>(&self, transform: &C, x: &[f64]) -> Result<f64, JacobianError> {
        log_abs_det(&self.jacobian(transform, x)?)
    }
}

/// Uses [`CoordinateTransform::jacobian`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Analytic;

impl Differentiator for Analytic {
    fn jacobian<C: CoordinateTransform>(&self, transform: &C, x: &[f64]) -> Result<Mat<f64>, JacobianError> {
        transform
            .jacobian(x)
            .ok_or(JacobianError::NoAnalyticJacobian)
    }
}

/// One dual number pass per input coordinate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardDiff;

impl Differentiator for ForwardDiff {
    fn jacobian<C: CoordinateTransform>(&self, transform: &C, x: &[f64]) -> Result<Mat<f64>, JacobianError> {
        let n = x.len();
        let mut jac = Mat::zeros(n, n);
        for col in 0..n {
            let seeded: Vec<Dual> = x
                .iter()
                .enumerate()
                .map(|(i, &v)| if i == col { Dual::variable(v) } else { Dual::constant(v) })
                .collect();
            let out = transform.apply(&seeded);
            if out.len() != n {
                return Err(JacobianError::NotSquare {
                    rows: out.len(),
                    cols: n,
                });
            }
            for (row, d) in out.iter().enumerate() {
                jac[(row, col)] = d.eps;
            }
        }
        Ok(jac)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CentralDifference {
    pub step: f64,
}

impl Default for CentralDifference {
    fn default() -> Self {
        CentralDifference { step: 1e-6 }
    }
}

impl Differentiator for CentralDifference {
    fn jacobian<C: CoordinateTransform>(&self, transform: &C, x: &[f64]) -> Result<Mat<f64>, JacobianError> {
        let n = x.len();
        let mut jac = Mat::zeros(n, n);
        let mut point = x.to_vec();
        for col in 0..n {
            // Relative step keeps the difference meaningful for large coordinates.
            let h = self.step * x[col].abs().max(1.);
            point[col] = x[col] + h;
            let plus = transform.apply(&point);
            point[col] = x[col] - h;
            let minus = transform.apply(&point);
            point[col] = x[col];
            if plus.len() != n || minus.len() != n {
                return Err(JacobianError::NotSquare {
                    rows: plus.len(),
                    cols: n,
                });
            }
            for row in 0..n {
                jac[(row, col)] = (plus[row] - minus[row]) / (2. * h);
            }
        }
        Ok(jac)
    }
}

/// `ln |det J|` by LU decomposition with partial pivoting.
///
/// Singular matrices give `-inf`.
pub fn log_abs_det(jac: &Mat<f64>) -> Result<f64, JacobianError> {
    let (rows, cols) = (jac.nrows(), jac.ncols());
    if rows != cols {
        return Err(JacobianError::NotSquare { rows, cols });
    }
    if (0..rows).any(|i| (0..cols).any(|j| !jac[(i, j)].is_finite())) {
        return Err(JacobianError::NonFinite);
    }
    if rows == 0 {
        return Ok(0.);
    }
    let lu = jac.partial_piv_lu();
    let mut total = 0.;
    for &u in lu.U().diagonal().column_vector().iter() {
        if u == 0. {
            return Ok(f64::NEG_INFINITY);
        }
        total += u.abs().ln();
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Polar-like coordinates, `|det J| = 2r / (1 + t^2)`.
    struct Polar;

    impl CoordinateTransform for Polar {
        fn dim(&self) -> usize {
            2
        }

        fn apply<S: Scalar>(&self, x: &[S]) -> Vec<S> {
            // Rational parametrization of the circle, t -> (1 - t^2, 2t) / (1 + t^2).
            let one = S::constant(1.);
            let two = S::constant(2.);
            let (r, t) = (x[0], x[1]);
            let denom = one + t * t;
            vec![r * (one - t * t) / denom, r * two * t / denom]
        }

        fn jacobian(&self, x: &[f64]) -> Option<Mat<f64>> {
            let (r, t) = (x[0], x[1]);
            let d = 1. + t * t;
            Some(Mat::from_fn(2, 2, |i, j| match (i, j) {
                (0, 0) => (1. - t * t) / d,
                (1, 0) => 2. * t / d,
                (0, 1) => -4. * r * t / (d * d),
                _ => 2. * r * (1. - t * t) / (d * d),
            }))
        }
    }

    struct Scale;

    impl CoordinateTransform for Scale {
        fn dim(&self) -> usize {
            2
        }

        fn apply<S: Scalar>(&self, x: &[S]) -> Vec<S> {
            vec![x[0] * x[1].exp(), -x[1]]
        }
    }

    #[test]
    fn differentiators_agree() {
        let x = [1.7, 0.4];
        // |det| = r * 2 / (1 + t^2)
        let expected = (1.7f64 * 2. / (1. + 0.16)).ln();
        let analytic = Analytic.log_abs_det(&Polar, &x).unwrap();
        let forward = ForwardDiff.log_abs_det(&Polar, &x).unwrap();
        let central = CentralDifference::default().log_abs_det(&Polar, &x).unwrap();
        assert!((analytic - expected).abs() < 1e-12);
        assert!((forward - expected).abs() < 1e-12);
        assert!((central - expected).abs() < 1e-6);
    }

    #[test]
    fn forward_matches_central_without_analytic() {
        let x = [2.5, -0.3];
        assert_eq!(
            Analytic.log_abs_det(&Scale, &x),
            Err(JacobianError::NoAnalyticJacobian)
        );
        let forward = ForwardDiff.log_abs_det(&Scale, &x).unwrap();
        let central = CentralDifference::default().log_abs_det(&Scale, &x).unwrap();
        assert!((forward - (-0.3)).abs() < 1e-12);
        assert!((forward - central).abs() < 1e-6);
    }

    #[test]
    fn singular_matrix() {
        let jac = Mat::from_fn(2, 2, |i, _| i as f64 + 1.);
        assert_eq!(log_abs_det(&jac).unwrap(), f64::NEG_INFINITY);
        let empty = Mat::<f64>::zeros(0, 0);
        assert_eq!(log_abs_det(&empty).unwrap(), 0.);
    }

    #[test]
    fn log_abs_det_with_row_swaps() {
        let jac = Mat::from_fn(2, 2, |i, j| [[0., 2.], [3., 1.]][i][j]);
        assert!((log_abs_det(&jac).unwrap() - 6f64.ln()).abs() < 1e-12);

        // det = -0.5 + 8 - 9
        let entries = [[1., 2., 3.], [4., 5., 6.], [7., 8., 9.5]];
        let jac = Mat::from_fn(3, 3, |i, j| entries[i][j]);
        assert!((log_abs_det(&jac).unwrap() - 1.5f64.ln()).abs() < 1e-10);

        let bad = Mat::from_fn(2, 3, |_, _| 1.);
        assert!(matches!(log_abs_det(&bad), Err(JacobianError::NotSquare { rows: 2, cols: 3 })));
    }

    #[test]
    fn dual_arithmetic() {
        let x = Dual::variable(2.);
        let y = (x * x + Dual::constant(1.)) / x;
        assert_eq!(y.re, 2.5);
        // d/dx (x + 1/x) = 1 - 1/x^2
        assert!((y.eps - 0.75).abs() < 1e-15);
        assert!((x.ln().eps - 0.5).abs() < 1e-15);
        assert!((x.exp().eps - 2f64.exp()).abs() < 1e-12);
    }
}
