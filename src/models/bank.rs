//! Model bank construction.
//!
//! Pipeline per candidate:
//! - neural response: Gaussian pRF overlap with every frame (runs concatenated)
//! - predicted BOLD: causal convolution with the canonical HRF sampled at TR
//! - optional Gaussian temporal smoothing (SD given in seconds)
//!
//! The resulting bank is keyed by everything that shaped it (`ModelKey`), so a
//! cached bank is only reused for the configuration it was built for.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PrfError;
use crate::grid::{GridSpec, VisualSpaceGrid};
use crate::math::{HrfParams, convolve_causal, gaussian_kernel, sample_hrf, smooth_in_place};
use crate::models::{StimulusSequence, neural_responses};

/// Parameters of the time-course synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankSpec {
    /// Repetition time (s).
    pub tr: f64,
    /// Temporal smoothing SD (s); zero disables.
    pub sd_smth_tmp: f64,
    pub hrf: HrfParams,
}

/// Identity of a model bank: everything that determines its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelKey {
    pub grid: GridSpec,
    pub bank: BankSpec,
    /// Stimulus frame prefixes, one per run.
    pub stimulus: Vec<String>,
    /// Frames per run.
    pub run_lengths: Vec<usize>,
}

/// Predicted time courses: one row per grid candidate, one column per volume.
#[derive(Debug, Clone)]
pub struct ModelBank {
    key: ModelKey,
    grid: VisualSpaceGrid,
    values: DMatrix<f64>,
}

impl ModelBank {
    /// Wrap precomputed time courses, checking them against the key.
    pub fn new(key: ModelKey, values: DMatrix<f64>) -> Result<Self, PrfError> {
        let grid = VisualSpaceGrid::new(&key.grid)?;
        if values.nrows() != grid.len() {
            return Err(PrfError::shape(format!(
                "Model bank has {} time courses but the grid has {} candidates.",
                values.nrows(),
                grid.len()
            )));
        }
        let n_vol: usize = key.run_lengths.iter().sum();
        if values.ncols() != n_vol {
            return Err(PrfError::shape(format!(
                "Model bank has {} volumes but runs add up to {n_vol}.",
                values.ncols()
            )));
        }
        Ok(Self { key, grid, values })
    }

    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    pub fn grid(&self) -> &VisualSpaceGrid {
        &self.grid
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn n_candidates(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_volumes(&self) -> usize {
        self.values.ncols()
    }

    pub fn run_lengths(&self) -> &[usize] {
        &self.key.run_lengths
    }

    /// Predicted time course of one candidate.
    pub fn time_course(&self, candidate: usize) -> Vec<f64> {
        self.values.row(candidate).iter().copied().collect()
    }
}

/// Build the model bank for a grid and stimulus sequence.
pub fn build_model_bank(
    grid: &VisualSpaceGrid,
    stimulus: &StimulusSequence,
    spec: &BankSpec,
    stimulus_ids: Vec<String>,
) -> Result<ModelBank, PrfError> {
    if !(spec.tr.is_finite() && spec.tr > 0.0) {
        return Err(PrfError::config(format!("Invalid TR: {}", spec.tr)));
    }
    let gspec = grid.spec();
    if stimulus.raster_x() != gspec.raster_x || stimulus.raster_y() != gspec.raster_y {
        return Err(PrfError::shape(format!(
            "Stimulus raster is {}x{} px but the grid expects {}x{}.",
            stimulus.raster_x(),
            stimulus.raster_y(),
            gspec.raster_x,
            gspec.raster_y
        )));
    }

    info!(
        candidates = grid.len(),
        frames = stimulus.n_frames(),
        runs = stimulus.n_runs(),
        "building pRF model bank"
    );

    let raw = neural_responses(grid, stimulus);
    let hrf = sample_hrf(&spec.hrf, spec.tr);
    let kernel = gaussian_kernel(spec.sd_smth_tmp / spec.tr);
    debug!(hrf_len = hrf.len(), smooth_len = kernel.len(), "time-course filters ready");

    let rows: Vec<Vec<f64>> = (0..raw.nrows())
        .into_par_iter()
        .map(|i| {
            let neural: Vec<f64> = raw.row(i).iter().copied().collect();
            let mut bold = convolve_causal(&neural, &hrf);
            smooth_in_place(&mut bold, &kernel);
            bold
        })
        .collect();

    let n_vol = raw.ncols();
    let values = DMatrix::from_fn(rows.len(), n_vol, |i, t| rows[i][t]);

    let key = ModelKey {
        grid: gspec.clone(),
        bank: spec.clone(),
        stimulus: stimulus_ids,
        run_lengths: stimulus.run_lengths(),
    };
    ModelBank::new(key, values)
}
