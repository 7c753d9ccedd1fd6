//! Binary stimulus rasters, grouped per run.

use nalgebra::DMatrix;

use crate::error::PrfError;

/// Ordered per-run stimulus frames.
///
/// Each frame is a `raster_y × raster_x` matrix of `0.0` / `1.0` (row 0 is the
/// top of the image). Read-only once constructed.
#[derive(Debug, Clone)]
pub struct StimulusSequence {
    raster_x: usize,
    raster_y: usize,
    runs: Vec<Vec<DMatrix<f64>>>,
}

impl StimulusSequence {
    pub fn new(raster_x: usize, raster_y: usize, runs: Vec<Vec<DMatrix<f64>>>) -> Result<Self, PrfError> {
        for (r, run) in runs.iter().enumerate() {
            for (f, frame) in run.iter().enumerate() {
                if frame.nrows() != raster_y || frame.ncols() != raster_x {
                    return Err(PrfError::shape(format!(
                        "Stimulus frame {f} of run {} is {}x{} px, expected {raster_x}x{raster_y}.",
                        r + 1,
                        frame.ncols(),
                        frame.nrows(),
                    )));
                }
            }
        }
        Ok(Self {
            raster_x,
            raster_y,
            runs,
        })
    }

    pub fn raster_x(&self) -> usize {
        self.raster_x
    }

    pub fn raster_y(&self) -> usize {
        self.raster_y
    }

    pub fn n_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn run_lengths(&self) -> Vec<usize> {
        self.runs.iter().map(Vec::len).collect()
    }

    pub fn n_frames(&self) -> usize {
        self.runs.iter().map(Vec::len).sum()
    }

    /// All frames, concatenated in run order.
    pub fn frames(&self) -> impl Iterator<Item = &DMatrix<f64>> {
        self.runs.iter().flatten()
    }
}
