//! Single-threaded reference backend.

use crate::error::PrfError;
use crate::fit::backend::{check_inputs, finish};
use crate::fit::{BlockFit, FitResult, FittingBackend, ScoredBank};
use crate::io::FunctionalDataSource;
use crate::models::ModelBank;

/// Voxels read from the data source per step.
const BLOCK_VOXELS: usize = 512;

/// Scans all voxels in order on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialBackend;

impl FittingBackend for SequentialBackend {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn fit(&self, bank: &ModelBank, data: &dyn FunctionalDataSource) -> Result<Vec<FitResult>, PrfError> {
        check_inputs(bank, data)?;
        let scored = ScoredBank::new(bank);
        let n = data.n_voxels();

        let mut parts = Vec::with_capacity(n.div_ceil(BLOCK_VOXELS));
        let mut start = 0;
        while start < n {
            let end = (start + BLOCK_VOXELS).min(n);
            let block = data.read_chunk(start..end)?;
            parts.push(scored.fit_block(&block));
            start = end;
        }
        Ok(finish(self.name(), BlockFit::merge(parts)))
    }
}
