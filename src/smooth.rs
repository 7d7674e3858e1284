use crate::error::{RetrackError, RetrackResult};

/// Kernel half-width in standard deviations.
pub const GAUSSIAN_TRUNCATE: f64 = 4.0;

/// Normalized Gaussian weights for offsets `-r..=r`, `r = round(4 * sigma)`.
pub fn gaussian_kernel(sigma: f64) -> RetrackResult<Vec<f64>> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(RetrackError::validation("gaussian sigma must be > 0"));
    }

    let r = (GAUSSIAN_TRUNCATE * sigma + 0.5) as i64;
    let denom = 2.0 * sigma * sigma;
    let mut weights = Vec::with_capacity((2 * r + 1) as usize);
    let mut sum = 0.0f64;
    for i in -r..=r {
        let x = i as f64;
        let w = (-x * x / denom).exp();
        weights.push(w);
        sum += w;
    }
    if sum <= 0.0 {
        return Err(RetrackError::evaluation("gaussian kernel sum is zero"));
    }
    for w in &mut weights {
        *w /= sum;
    }
    Ok(weights)
}

/// 1D Gaussian filter with half-sample symmetric ("reflect") boundaries, matching
/// `scipy.ndimage.gaussian_filter1d` defaults.
pub fn gaussian_filter1d(values: &[f64], sigma: f64) -> RetrackResult<Vec<f64>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let kernel = gaussian_kernel(sigma)?;
    let radius = (kernel.len() / 2) as i64;
    let n = values.len() as i64;

    let out = (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(ki, &w)| w * values[reflect(i + ki as i64 - radius, n)])
                .sum::<f64>()
        })
        .collect();
    Ok(out)
}

fn reflect(i: i64, n: i64) -> usize {
    let period = 2 * n;
    let m = i.rem_euclid(period);
    (if m < n { m } else { period - 1 - m }) as usize
}
