//! Shape inference, expansion and gradient reduction for array arguments.
//!
//! Shapes are aligned from the leading dimension: a shape with fewer dimensions is
//! padded with trailing ones, and a dimension of size one expands to any size.
//! So `[3]` against `[3, 2]` broadcasts to `[3, 2]`, while `[2]` against `[3, 2]`
//! is a mismatch.

use itertools::Itertools;
use ndarray::{ArrayD, Axis, IxDyn};

use crate::distributions::{DistError, Result};

fn padded(shape: &[usize], ndim: usize) -> Vec<usize> {
    shape
        .iter()
        .copied()
        .chain(std::iter::repeat(1))
        .take(ndim)
        .collect()
}

/// Common shape of several arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    shape: Vec<usize>,
}

impl Broadcast {
    pub fn new(shapes: &[&[usize]]) -> Result<Self> {
        let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
        let mut shape = vec![1; ndim];
        for s in shapes {
            for (axis, (out, &dim)) in shape.iter_mut().zip(&padded(s, ndim)).enumerate() {
                if *out == 1 {
                    *out = dim;
                } else if dim != 1 && dim != *out {
                    return Err(DistError::ShapeMismatch(format!(
                        "cannot broadcast shapes {} (axis {axis}: {dim} vs {out})",
                        shapes.iter().map(|s| format!("{s:?}")).join(", "),
                    )));
                }
            }
        }
        Ok(Broadcast { shape })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn aligned(&self, array: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        if array.ndim() > self.shape.len() {
            return Err(DistError::ShapeMismatch(format!(
                "array of shape {:?} has more dimensions than {:?}",
                array.shape(),
                self.shape
            )));
        }
        let shape = padded(array.shape(), self.shape.len());
        ArrayD::from_shape_vec(IxDyn(&shape), array.iter().copied().collect())
            .map_err(|err| DistError::ShapeMismatch(err.to_string()))
    }

    /// Values of `array` expanded to the common shape, in row-major order.
    pub fn expand(&self, array: &ArrayD<f64>) -> Result<Vec<f64>> {
        let aligned = self.aligned(array)?;
        let view = aligned.broadcast(IxDyn(&self.shape)).ok_or_else(|| {
            DistError::ShapeMismatch(format!(
                "cannot expand shape {:?} to {:?}",
                array.shape(),
                self.shape
            ))
        })?;
        Ok(view.iter().copied().collect())
    }

    /// Sum a gradient over the common shape back onto the shape `target`.
    pub fn reduce(&self, grad: &[f64], target: &[usize]) -> Result<ArrayD<f64>> {
        let mut full = ArrayD::from_shape_vec(IxDyn(&self.shape), grad.to_vec())
            .map_err(|err| DistError::ShapeMismatch(err.to_string()))?;
        let aligned = padded(target, self.shape.len());
        for (axis, (&small, &big)) in aligned.iter().zip(&self.shape).enumerate() {
            if small == 1 && big != 1 {
                full = full.sum_axis(Axis(axis)).insert_axis(Axis(axis));
            }
        }
        ArrayD::from_shape_vec(IxDyn(target), full.iter().copied().collect())
            .map_err(|err| DistError::ShapeMismatch(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use pretty_assertions::assert_eq;

    #[test]
    fn leading_alignment() {
        let b = Broadcast::new(&[&[3, 2], &[3], &[1, 2]]).unwrap();
        assert_eq!(b.shape(), &[3, 2]);
        assert_eq!(Broadcast::new(&[&[], &[4]]).unwrap().shape(), &[4]);
        assert!(matches!(
            Broadcast::new(&[&[3, 2], &[2]]),
            Err(DistError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn expand_and_reduce() {
        let b = Broadcast::new(&[&[2, 3], &[2]]).unwrap();
        let col = arr1(&[1., 2.]).into_dyn();
        assert_eq!(b.expand(&col).unwrap(), vec![1., 1., 1., 2., 2., 2.]);

        let row = arr2(&[[10., 20., 30.]]).into_dyn();
        assert_eq!(b.expand(&row).unwrap(), vec![10., 20., 30., 10., 20., 30.]);

        let grad = [1., 2., 3., 4., 5., 6.];
        assert_eq!(b.reduce(&grad, &[2]).unwrap(), arr1(&[6., 15.]).into_dyn());
        assert_eq!(
            b.reduce(&grad, &[1, 3]).unwrap(),
            arr2(&[[5., 7., 9.]]).into_dyn()
        );
        assert_eq!(b.reduce(&grad, &[]).unwrap().sum(), 21.);
    }

    #[test]
    fn reject_higher_rank() {
        let b = Broadcast::new(&[&[2]]).unwrap();
        assert!(b.expand(&arr2(&[[1.], [2.]]).into_dyn()).is_err());
    }
}
