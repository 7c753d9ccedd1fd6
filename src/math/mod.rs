//! Mathematical utilities: least squares, smoothing kernels and the HRF.

pub mod hrf;
pub mod kernel;
pub mod ols;

pub use hrf::*;
pub use kernel::*;
pub use ols::*;

/// Whether a series is constant up to rounding, given its mean and centred
/// sum of squares over `n` samples.
///
/// A constant series leaves at most a few `n·ε·|mean|` of residue per sample
/// after centring or detrending; anything above that is real variation.
pub fn is_zero_variance(ss: f64, n: usize, mean: f64) -> bool {
    let tol = 8.0 * n as f64 * f64::EPSILON * mean.abs();
    !(ss.is_finite() && ss > 0.0 && ss > n as f64 * tol * tol)
}
