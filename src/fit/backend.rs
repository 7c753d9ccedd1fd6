//! Backend trait and one-time resolution from configuration.

use tracing::{info, warn};

use crate::domain::BackendKind;
use crate::error::PrfError;
use crate::fit::{AcceleratedBackend, BlockFit, ChunkedBackend, FitResult, SequentialBackend};
use crate::io::FunctionalDataSource;
use crate::models::ModelBank;

/// A strategy for the exhaustive per-voxel search.
///
/// All implementations return one result per voxel, in the data source's voxel
/// order, and select identical candidates for identical inputs. They differ
/// only in scheduling.
pub trait FittingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&self, bank: &ModelBank, data: &dyn FunctionalDataSource) -> Result<Vec<FitResult>, PrfError>;
}

/// Build the backend selected by the configuration.
///
/// Fails with `BackendUnavailable` up front if the backend cannot run here.
pub fn resolve_backend(kind: BackendKind, par: usize) -> Result<Box<dyn FittingBackend>, PrfError> {
    let backend: Box<dyn FittingBackend> = match kind {
        BackendKind::Numpy => Box::new(SequentialBackend),
        BackendKind::Cython => Box::new(ChunkedBackend::new(par)?),
        BackendKind::Gpu => Box::new(AcceleratedBackend::gpu()?),
        BackendKind::Bulk => Box::new(AcceleratedBackend::host()),
    };
    info!(backend = backend.name(), "fitting backend resolved");
    Ok(backend)
}

/// Shared input checks, run before any scoring.
pub(crate) fn check_inputs(bank: &ModelBank, data: &dyn FunctionalDataSource) -> Result<(), PrfError> {
    if data.n_volumes() != bank.n_volumes() {
        return Err(PrfError::shape(format!(
            "Functional data has {} volumes but the model bank has {}.",
            data.n_volumes(),
            bank.n_volumes()
        )));
    }
    Ok(())
}

/// Log the outcome of a fit and hand back its results.
pub(crate) fn finish(backend: &str, fit: BlockFit) -> Vec<FitResult> {
    if fit.degenerate > 0 {
        warn!(
            backend,
            voxels = fit.degenerate,
            "zero-variance voxels assigned the first grid candidate with R2 = 0"
        );
    }
    info!(backend, voxels = fit.results.len(), "pRF fitting complete");
    fit.results
}
