//! Per-voxel time-course operations.

use nalgebra::DMatrix;

use crate::error::PrfError;
use crate::math::{is_zero_variance, linear_trend_design, solve_least_squares};

/// Remove the least-squares line `a + b·t` from every series, keeping its mean.
///
/// All series share one design matrix, so they are solved in a single call.
pub fn remove_linear_trend(series: &mut [Vec<f64>]) -> Result<(), PrfError> {
    let Some(n) = series.first().map(Vec::len) else {
        return Ok(());
    };
    if n < 3 {
        return Ok(());
    }
    let x = linear_trend_design(n);
    let y = DMatrix::from_fn(n, series.len(), |t, v| series[v][t]);
    let beta = solve_least_squares(&x, &y)
        .ok_or_else(|| PrfError::format("Linear trend regression is ill-conditioned."))?;
    let fitted = &x * &beta;

    for (v, s) in series.iter_mut().enumerate() {
        let mean = s.iter().sum::<f64>() / n as f64;
        for (t, value) in s.iter_mut().enumerate() {
            *value = *value - fitted[(t, v)] + mean;
        }
    }
    Ok(())
}

/// Standardise to zero mean and unit (population) SD; constant series become zeros.
pub fn zscore(series: &mut [f64]) {
    if series.is_empty() {
        return;
    }
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let ss: f64 = series.iter().map(|v| (v - mean).powi(2)).sum();
    if is_zero_variance(ss, series.len(), mean) {
        series.fill(0.0);
        return;
    }
    let sd = (ss / n).sqrt();
    for v in series.iter_mut() {
        *v = (*v - mean) / sd;
    }
}
