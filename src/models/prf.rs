//! Overlap between Gaussian pRFs and stimulus frames.
//!
//! For a pRF at `(x0, y0)` with size `σ`, the weight raster is
//!
//! ```text
//! g(c, r) = exp(-((x_c - x0)² + (y_r - y0)²) / (2σ²)) / Σ g
//! ```
//!
//! and the neural response to a frame `M` is `Σ M ⊙ g`. The Gaussian is
//! separable, so for one size and all positions at once:
//!
//! ```text
//! R = Gyᵀ · M · Gx        (Gx: raster_x × num_x, Gy: raster_y × num_y)
//! ```
//!
//! which turns the per-candidate raster sum into two matrix products per frame.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::grid::VisualSpaceGrid;
use crate::models::StimulusSequence;

/// Separable profile matrices for one pRF size.
struct SizeProfiles {
    gx: DMatrix<f64>,
    gy: DMatrix<f64>,
    /// `1 / Σ g` per `(iy, ix)`; zero when the raster sum underflows.
    inv_norm: DMatrix<f64>,
}

fn size_profiles(grid: &VisualSpaceGrid, sigma: f64) -> SizeProfiles {
    let spec = grid.spec();
    let denom = 2.0 * sigma * sigma;
    let gx = DMatrix::from_fn(spec.raster_x, spec.num_x, |c, ix| {
        let d = grid.pixel_to_deg_x(c) - grid.xs()[ix];
        (-(d * d) / denom).exp()
    });
    let gy = DMatrix::from_fn(spec.raster_y, spec.num_y, |r, iy| {
        let d = grid.pixel_to_deg_y(r) - grid.ys()[iy];
        (-(d * d) / denom).exp()
    });
    let sx: Vec<f64> = gx.column_iter().map(|c| c.sum()).collect();
    let sy: Vec<f64> = gy.column_iter().map(|c| c.sum()).collect();
    let inv_norm = DMatrix::from_fn(spec.num_y, spec.num_x, |iy, ix| {
        let s = sx[ix] * sy[iy];
        if s > 0.0 { 1.0 / s } else { 0.0 }
    });
    SizeProfiles { gx, gy, inv_norm }
}

/// Raw neural response time courses, one row per candidate (canonical order),
/// one column per frame (runs concatenated in order).
pub fn neural_responses(grid: &VisualSpaceGrid, stimulus: &StimulusSequence) -> DMatrix<f64> {
    let profiles: Vec<SizeProfiles> = grid.sigmas().iter().map(|&s| size_profiles(grid, s)).collect();
    let frames: Vec<&DMatrix<f64>> = stimulus.frames().collect();
    let n_cand = grid.len();

    // One column per frame; frames are independent.
    let columns: Vec<Vec<f64>> = frames
        .par_iter()
        .map(|frame| {
            let mut col = vec![0.0; n_cand];
            for (is, p) in profiles.iter().enumerate() {
                let r = p.gy.transpose() * (*frame) * &p.gx;
                for ix in 0..grid.xs().len() {
                    for iy in 0..grid.ys().len() {
                        col[grid.index_of(ix, iy, is)] = r[(iy, ix)] * p.inv_norm[(iy, ix)];
                    }
                }
            }
            col
        })
        .collect();

    DMatrix::from_fn(n_cand, columns.len(), |i, t| columns[t][i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;

    fn small_grid() -> VisualSpaceGrid {
        VisualSpaceGrid::new(&GridSpec {
            num_x: 3,
            num_y: 2,
            num_sizes: 2,
            ext_x_min: -3.0,
            ext_x_max: 3.0,
            ext_y_min: -2.0,
            ext_y_max: 2.0,
            std_min: 0.5,
            std_max: 1.0,
            raster_x: 12,
            raster_y: 8,
        })
        .unwrap()
    }

    /// Direct (non-separable) evaluation for comparison.
    fn direct_response(grid: &VisualSpaceGrid, frame: &DMatrix<f64>, index: usize) -> f64 {
        let c = grid.candidate(index);
        let mut num = 0.0;
        let mut den = 0.0;
        for r in 0..frame.nrows() {
            for col in 0..frame.ncols() {
                let dx = grid.pixel_to_deg_x(col) - c.x;
                let dy = grid.pixel_to_deg_y(r) - c.y;
                let g = (-(dx * dx + dy * dy) / (2.0 * c.sigma * c.sigma)).exp();
                num += frame[(r, col)] * g;
                den += g;
            }
        }
        num / den
    }

    #[test]
    fn separable_overlap_matches_direct_sum() {
        let grid = small_grid();
        // Left half of the field stimulated.
        let frame = DMatrix::from_fn(8, 12, |_, c| if c < 6 { 1.0 } else { 0.0 });
        let stim = StimulusSequence::new(12, 8, vec![vec![frame.clone()]]).unwrap();

        let resp = neural_responses(&grid, &stim);
        assert_eq!(resp.shape(), (grid.len(), 1));
        for i in 0..grid.len() {
            let expected = direct_response(&grid, &frame, i);
            assert!((resp[(i, 0)] - expected).abs() < 1e-12, "candidate {i}");
        }
    }

    #[test]
    fn full_field_stimulus_gives_unit_response() {
        let grid = small_grid();
        let frame = DMatrix::from_element(8, 12, 1.0);
        let blank = DMatrix::from_element(8, 12, 0.0);
        let stim = StimulusSequence::new(12, 8, vec![vec![frame, blank]]).unwrap();

        let resp = neural_responses(&grid, &stim);
        for i in 0..grid.len() {
            assert!((resp[(i, 0)] - 1.0).abs() < 1e-12);
            assert_eq!(resp[(i, 1)], 0.0);
        }
    }
}
