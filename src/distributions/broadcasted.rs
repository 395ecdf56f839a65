use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution as _, StandardNormal};

use super::{DistError, Distribution, Grad, Result};
use crate::broadcast::Broadcast;
use crate::math::{normal_logp, normal_logp_grad};

/// Independent normals over an array, with mean and std broadcast against each other.
///
/// The value must already have the broadcast shape of all three arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastedNormal;

struct Expanded {
    broadcast: Broadcast,
    mean: Vec<f64>,
    std: Vec<f64>,
}

fn expand_params(
    value_shape: Option<&[usize]>,
    mean: &ArrayD<f64>,
    std: &ArrayD<f64>,
) -> Result<Expanded> {
    let broadcast = match value_shape {
        Some(shape) => {
            let broadcast = Broadcast::new(&[shape, mean.shape(), std.shape()])?;
            if broadcast.shape() != shape {
                return Err(DistError::ShapeMismatch(format!(
                    "value has shape {shape:?}, parameters broadcast to {:?}",
                    broadcast.shape()
                )));
            }
            broadcast
        }
        None => Broadcast::new(&[mean.shape(), std.shape()])?,
    };
    if let Some(m) = mean.iter().find(|m| !m.is_finite()) {
        return Err(DistError::InvalidParameter(format!(
            "mean must be finite, got {m}"
        )));
    }
    if let Some(s) = std.iter().find(|s| !(s.is_finite() && **s > 0.)) {
        return Err(DistError::InvalidParameter(format!(
            "std must be finite and > 0, got {s}"
        )));
    }
    Ok(Expanded {
        mean: broadcast.expand(mean)?,
        std: broadcast.expand(std)?,
        broadcast,
    })
}

impl Distribution for BroadcastedNormal {
    type Value = ArrayD<f64>;
    /// `(mean, std)`
    type Params = (ArrayD<f64>, ArrayD<f64>);

    fn name(&self) -> &'static str {
        "broadcasted_normal"
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, (mean, std): &Self::Params) -> Result<ArrayD<f64>> {
        let params = expand_params(None, mean, std)?;
        let draws = params
            .mean
            .iter()
            .zip(&params.std)
            .map(|(m, s)| {
                let z: f64 = StandardNormal.sample(rng);
                m + s * z
            })
            .collect();
        ArrayD::from_shape_vec(IxDyn(params.broadcast.shape()), draws)
            .map_err(|err| DistError::ShapeMismatch(err.to_string()))
    }

    fn log_density(&self, x: &ArrayD<f64>, (mean, std): &Self::Params) -> Result<f64> {
        let params = expand_params(Some(x.shape()), mean, std)?;
        let x: Vec<f64> = x.iter().copied().collect();
        let logp = normal_logp(&x, &params.mean, &params.std);
        if logp.is_nan() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(logp)
    }

    fn log_density_grad(&self, x: &ArrayD<f64>, (mean, std): &Self::Params) -> Result<Vec<Grad>> {
        let params = expand_params(Some(x.shape()), mean, std)?;
        let values: Vec<f64> = x.iter().copied().collect();
        let n = values.len();
        let mut grad_x = vec![0.; n];
        let mut grad_mean = vec![0.; n];
        let mut grad_std = vec![0.; n];
        normal_logp_grad(
            &values,
            &params.mean,
            &params.std,
            &mut grad_x,
            &mut grad_mean,
            &mut grad_std,
        );
        let b = &params.broadcast;
        Ok(vec![
            Grad::Array(b.reduce(&grad_x, x.shape())?),
            Grad::Array(b.reduce(&grad_mean, mean.shape())?),
            Grad::Array(b.reduce(&grad_std, std.shape())?),
        ])
    }

    fn differentiable(&self) -> &'static [bool] {
        &[true, true, true]
    }
}
