//! Candidate grid generation and raster ↔ degree mapping.
//!
//! We fit pRFs by a deterministic grid search over `(x, y, σ)`:
//! - positions are evenly spaced over the configured visual-field extent
//! - sizes are evenly spaced between the configured bounds
//! - ordering is row-major over `(x, y, σ)` so indices are stable across runs
//!
//! The high-resolution stimulus raster covers the same extent. Pixel centres
//! sit half a pixel inside the extent borders; raster row 0 is the top of the
//! image (largest `y`).

use serde::{Deserialize, Serialize};

use crate::error::PrfError;

/// Grid and raster parameters, as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub num_x: usize,
    pub num_y: usize,
    pub num_sizes: usize,
    pub ext_x_min: f64,
    pub ext_x_max: f64,
    pub ext_y_min: f64,
    pub ext_y_max: f64,
    pub std_min: f64,
    pub std_max: f64,
    /// Raster width in pixels.
    pub raster_x: usize,
    /// Raster height in pixels.
    pub raster_y: usize,
}

impl GridSpec {
    /// Check the grid parameters without building anything.
    pub fn validate(&self) -> Result<(), PrfError> {
        if self.num_x == 0 || self.num_y == 0 || self.num_sizes == 0 {
            return Err(PrfError::config(format!(
                "Grid counts must be >= 1 (varNumX={}, varNumY={}, varNumPrfSizes={}).",
                self.num_x, self.num_y, self.num_sizes
            )));
        }
        check_range("x extent", self.ext_x_min, self.ext_x_max)?;
        check_range("y extent", self.ext_y_min, self.ext_y_max)?;
        check_range("pRF size", self.std_min, self.std_max)?;
        if self.std_min <= 0.0 {
            return Err(PrfError::config(format!(
                "pRF size bounds must be > 0 (varPrfStdMin={}).",
                self.std_min
            )));
        }
        if self.ext_x_max <= self.ext_x_min || self.ext_y_max <= self.ext_y_min {
            return Err(PrfError::config(
                "Visual-space extent must have max > min on both axes.",
            ));
        }
        if self.raster_x == 0 || self.raster_y == 0 {
            return Err(PrfError::config("Visual-space raster dimensions must be >= 1."));
        }
        if self.raster_x % self.num_x != 0 {
            return Err(PrfError::config(format!(
                "varVslSpcSzeX={} is not an integer multiple of varNumX={}.",
                self.raster_x, self.num_x
            )));
        }
        if self.raster_y % self.num_y != 0 {
            return Err(PrfError::config(format!(
                "varVslSpcSzeY={} is not an integer multiple of varNumY={}.",
                self.raster_y, self.num_y
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.num_x * self.num_y * self.num_sizes
    }
}

fn check_range(label: &str, min: f64, max: f64) -> Result<(), PrfError> {
    if !(min.is_finite() && max.is_finite() && max >= min) {
        return Err(PrfError::config(format!(
            "Invalid {label} range: min={min}, max={max} (must be finite and max>=min)."
        )));
    }
    Ok(())
}

/// One grid point: pRF centre and size in degrees of visual angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub sigma: f64,
}

/// Immutable, ordered candidate grid.
#[derive(Debug, Clone)]
pub struct VisualSpaceGrid {
    spec: GridSpec,
    xs: Vec<f64>,
    ys: Vec<f64>,
    sigmas: Vec<f64>,
}

impl VisualSpaceGrid {
    pub fn new(spec: &GridSpec) -> Result<Self, PrfError> {
        spec.validate()?;
        Ok(Self {
            spec: spec.clone(),
            xs: lin_space(spec.ext_x_min, spec.ext_x_max, spec.num_x),
            ys: lin_space(spec.ext_y_min, spec.ext_y_max, spec.num_y),
            sigmas: lin_space(spec.std_min, spec.std_max, spec.num_sizes),
        })
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.spec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    /// Canonical index of `(ix, iy, is)`.
    pub fn index_of(&self, ix: usize, iy: usize, is: usize) -> usize {
        (ix * self.spec.num_y + iy) * self.spec.num_sizes + is
    }

    /// Candidate at a canonical index.
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    pub fn candidate(&self, index: usize) -> Candidate {
        let n_s = self.spec.num_sizes;
        let n_y = self.spec.num_y;
        let is = index % n_s;
        let iy = (index / n_s) % n_y;
        let ix = index / (n_s * n_y);
        Candidate {
            index,
            x: self.xs[ix],
            y: self.ys[iy],
            sigma: self.sigmas[is],
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
        (0..self.len()).map(|i| self.candidate(i))
    }

    /// Horizontal position (degrees) of the centre of raster column `col`.
    pub fn pixel_to_deg_x(&self, col: usize) -> f64 {
        self.spec.ext_x_min + (col as f64 + 0.5) * self.deg_per_px_x()
    }

    /// Vertical position (degrees) of the centre of raster row `row`.
    pub fn pixel_to_deg_y(&self, row: usize) -> f64 {
        self.spec.ext_y_max - (row as f64 + 0.5) * self.deg_per_px_y()
    }

    pub fn deg_per_px_x(&self) -> f64 {
        (self.spec.ext_x_max - self.spec.ext_x_min) / self.spec.raster_x as f64
    }

    pub fn deg_per_px_y(&self) -> f64 {
        (self.spec.ext_y_max - self.spec.ext_y_min) / self.spec.raster_y as f64
    }
}

/// `steps` evenly spaced points between `min` and `max` (inclusive).
///
/// A single step yields `[min]`.
pub fn lin_space(min: f64, max: f64, steps: usize) -> Vec<f64> {
    if steps == 1 {
        return vec![min];
    }
    let step = (max - min) / (steps as f64 - 1.0);
    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push(min + step * i as f64);
    }
    // Pin the endpoint exactly; accumulated rounding would otherwise leak into cache keys.
    if let Some(last) = out.last_mut() {
        *last = max;
    }
    out
}
