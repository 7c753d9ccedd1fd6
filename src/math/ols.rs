//! Least squares solver.
//!
//! Trend removal solves one small regression per voxel against the same design
//! matrix, so we solve all voxels at once with a multi-column right-hand side:
//!
//! ```text
//! minimize ‖X B - Y‖²   (X: n × p, Y: n × k, B: p × k)
//! ```
//!
//! Implementation choices:
//! - SVD so that tall design matrices are handled robustly.
//! - A progressively looser tolerance for near-singular designs.

use nalgebra::DMatrix;

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Design matrix `[1, t]` for `t = 0..n`.
pub fn linear_trend_design(n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { i as f64 })
}
