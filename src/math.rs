use itertools::izip;
use multiversion::multiversion;
use statrs::function::gamma::ln_gamma;

/// `ln(sqrt(2 pi))`
pub(crate) const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

pub(crate) fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[inline]
pub(crate) fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// `x * ln(y)` with the convention `0 * ln(0) = 0`.
#[inline]
pub(crate) fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0. {
        0.
    } else {
        x * y.ln()
    }
}

/// `x * ln(1 + y)` with the convention `0 * ln(0) = 0`.
#[inline]
pub(crate) fn xlog1py(x: f64, y: f64) -> f64 {
    if x == 0. {
        0.
    } else {
        x * y.ln_1p()
    }
}

/// Sign that treats zero as zero, unlike `f64::signum`.
#[inline]
pub(crate) fn sign(x: f64) -> f64 {
    if x > 0. {
        1.
    } else if x < 0. {
        -1.
    } else {
        0.
    }
}

/// Elementwise normal log density with its gradients.
///
/// All slices must have the same length. Gradients are written (not accumulated)
/// into `grad_x`, `grad_mean` and `grad_std`. Works on standardized deviations so that
/// huge deviations stay finite.
#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn normal_logp_grad(
    x: &[f64],
    mean: &[f64],
    std: &[f64],
    grad_x: &mut [f64],
    grad_mean: &mut [f64],
    grad_std: &mut [f64],
) -> f64 {
    let n = x.len();
    assert!(mean.len() == n);
    assert!(std.len() == n);
    assert!(grad_x.len() == n);
    assert!(grad_mean.len() == n);
    assert!(grad_std.len() == n);

    let mut logp = 0f64;
    for (x, mu, sd, gx, gm, gs) in izip!(x, mean, std, grad_x, grad_mean, grad_std) {
        let z = (x - mu) / sd;
        logp += -0.5 * z * z - sd.ln() - LN_SQRT_2PI;
        *gx = -z / sd;
        *gm = z / sd;
        *gs = (z * z - 1.) / sd;
    }
    logp
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn normal_logp(x: &[f64], mean: &[f64], std: &[f64]) -> f64 {
    let n = x.len();
    assert!(mean.len() == n);
    assert!(std.len() == n);

    izip!(x, mean, std)
        .map(|(x, mu, sd)| {
            let z = (x - mu) / sd;
            -0.5 * z * z - sd.ln() - LN_SQRT_2PI
        })
        .sum()
}
