//! Accelerated backend: bulk correlation followed by exact refinement.
//!
//! Candidate and voxel time courses are centred and scaled to unit norm, so a
//! single matrix product `U · Zᵀ` yields every voxel/candidate correlation. The
//! product runs on a [`CorrelationDevice`] (host GEMM or a wgpu compute kernel
//! in reduced precision). Its maxima are only used to narrow the search: every
//! candidate whose bulk R² lies within the device tolerance of the voxel's
//! bulk maximum is re-scored exactly with [`ScoredBank::best_of`]. The winner
//! is therefore the same candidate the sequential backend picks.

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::error::PrfError;
use crate::fit::backend::{check_inputs, finish};
use crate::fit::{BlockFit, CenteredSeries, FitResult, FittingBackend, ScoredBank};
use crate::io::FunctionalDataSource;
use crate::models::ModelBank;

/// Upper bound on `voxels × candidates` correlations held at once.
const TILE_ENTRIES: usize = 1 << 24;

/// A place where bulk correlations can be computed.
pub trait CorrelationDevice: Send + Sync {
    fn name(&self) -> &'static str;

    /// Load the unit-norm candidate rows (`candidates × volumes`).
    fn prepare<'a>(&'a self, models: &DMatrix<f64>) -> Result<Box<dyn CorrelationKernel + 'a>, PrfError>;
}

/// Candidate rows resident on a device.
pub trait CorrelationKernel {
    /// Correlations (`voxels × candidates`) of unit-norm voxel rows with every candidate.
    fn correlate(&self, voxels: &DMatrix<f64>) -> Result<DMatrix<f64>, PrfError>;

    /// Largest absolute R² error the bulk product may carry, doubled.
    fn tolerance(&self) -> f64;

    fn max_tile_voxels(&self) -> usize;
}

/// Host device: double-precision GEMM.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDevice;

struct HostKernel {
    models_t: DMatrix<f64>,
}

impl CorrelationDevice for HostDevice {
    fn name(&self) -> &'static str {
        "accelerated-host"
    }

    fn prepare<'a>(&'a self, models: &DMatrix<f64>) -> Result<Box<dyn CorrelationKernel + 'a>, PrfError> {
        Ok(Box::new(HostKernel { models_t: models.transpose() }))
    }
}

impl CorrelationKernel for HostKernel {
    fn correlate(&self, voxels: &DMatrix<f64>) -> Result<DMatrix<f64>, PrfError> {
        Ok(voxels * &self.models_t)
    }

    fn tolerance(&self) -> f64 {
        1e-9
    }

    fn max_tile_voxels(&self) -> usize {
        (TILE_ENTRIES / self.models_t.ncols().max(1)).max(1)
    }
}

pub struct AcceleratedBackend {
    device: Box<dyn CorrelationDevice>,
    tile_voxels: Option<usize>,
}

impl AcceleratedBackend {
    pub fn host() -> Self {
        Self::with_device(Box::new(HostDevice))
    }

    /// Backend on the first available GPU adapter.
    #[cfg(feature = "gpu")]
    pub fn gpu() -> Result<Self, PrfError> {
        Ok(Self::with_device(Box::new(crate::fit::gpu::GpuDevice::new()?)))
    }

    #[cfg(not(feature = "gpu"))]
    pub fn gpu() -> Result<Self, PrfError> {
        Err(PrfError::BackendUnavailable(
            "GPU fitting requested but this build has no `gpu` feature.".to_string(),
        ))
    }

    pub fn with_device(device: Box<dyn CorrelationDevice>) -> Self {
        Self { device, tile_voxels: None }
    }

    /// Cap the number of voxels correlated per device call.
    pub fn with_tile_voxels(mut self, voxels: usize) -> Self {
        self.tile_voxels = Some(voxels.max(1));
        self
    }
}

impl FittingBackend for AcceleratedBackend {
    fn name(&self) -> &'static str {
        self.device.name()
    }

    fn fit(&self, bank: &ModelBank, data: &dyn FunctionalDataSource) -> Result<Vec<FitResult>, PrfError> {
        check_inputs(bank, data)?;
        let scored = ScoredBank::new(bank);
        let kernel = self.device.prepare(&unit_models(&scored))?;

        let tile = match self.tile_voxels {
            Some(cap) => cap.min(kernel.max_tile_voxels()),
            None => kernel.max_tile_voxels(),
        };
        let n = data.n_voxels();
        let mut parts = Vec::with_capacity(n.div_ceil(tile));
        let mut start = 0;
        while start < n {
            let end = (start + tile).min(n);
            debug!(start, end, "correlating tile");
            let block = data.read_chunk(start..end)?;
            parts.push(fit_tile(&scored, kernel.as_ref(), &block)?);
            start = end;
        }
        Ok(finish(self.name(), BlockFit::merge(parts)))
    }
}

/// Centred candidate rows scaled to unit norm; zero rows for degenerate candidates.
fn unit_models(scored: &ScoredBank<'_>) -> DMatrix<f64> {
    let rows = scored.centered_rows();
    let ss = scored.sum_squares();
    DMatrix::from_fn(scored.n_candidates(), scored.n_volumes(), |c, t| {
        if ss[c] > 0.0 { rows[c][t] / ss[c].sqrt() } else { 0.0 }
    })
}

fn fit_tile(scored: &ScoredBank<'_>, kernel: &dyn CorrelationKernel, block: &DMatrix<f64>) -> Result<BlockFit, PrfError> {
    let series: Vec<Option<CenteredSeries>> = block
        .row_iter()
        .map(|row| CenteredSeries::new(&row.iter().copied().collect::<Vec<_>>()))
        .collect();
    let unit = DMatrix::from_fn(block.nrows(), block.ncols(), |v, t| {
        series[v].as_ref().map_or(0.0, |s| s.values[t] / s.ss.sqrt())
    });
    let corr = kernel.correlate(&unit)?;
    let tol = kernel.tolerance();
    let n_candidates = scored.n_candidates();

    let fitted: Vec<(FitResult, bool)> = series
        .par_iter()
        .enumerate()
        .map(|(v, s)| match s {
            None => (scored.degenerate_result(), true),
            Some(y) => {
                let r2 = |c: usize| {
                    let r = corr[(v, c)];
                    r * r
                };
                let max = (0..n_candidates).map(r2).fold(f64::NEG_INFINITY, f64::max);
                if !max.is_finite() {
                    return (scored.best_of(y, 0..n_candidates), false);
                }
                let floor = max - tol;
                (scored.best_of(y, (0..n_candidates).filter(|&c| r2(c) >= floor)), false)
            }
        })
        .collect();

    let degenerate = fitted.iter().filter(|(_, d)| *d).count();
    Ok(BlockFit {
        results: fitted.into_iter().map(|(r, _)| r).collect(),
        degenerate,
    })
}
