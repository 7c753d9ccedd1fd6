//! Chunked-parallel backend.
//!
//! The voxel range is split into `chunks` contiguous, disjoint pieces. Each
//! worker reads its own piece and scores it against the shared read-only bank.
//! Results are merged by chunk index, so the output order never depends on
//! which worker finishes first. Any failing chunk fails the whole fit.

use std::ops::Range;

use rayon::prelude::*;
use tracing::debug;

use crate::error::PrfError;
use crate::fit::backend::{check_inputs, finish};
use crate::fit::{BlockFit, FitResult, FittingBackend, ScoredBank};
use crate::io::FunctionalDataSource;
use crate::models::ModelBank;

#[derive(Debug, Clone, Copy)]
pub struct ChunkedBackend {
    chunks: usize,
}

impl ChunkedBackend {
    pub fn new(chunks: usize) -> Result<Self, PrfError> {
        if chunks == 0 {
            return Err(PrfError::config("varPar must be >= 1."));
        }
        Ok(Self { chunks })
    }
}

/// Contiguous chunk boundaries: chunk `i` starts at `⌊i·n/chunks⌋`.
///
/// Chunks may be empty when there are more chunks than voxels.
pub fn chunk_ranges(n: usize, chunks: usize) -> Vec<Range<usize>> {
    let chunks = chunks.max(1);
    let bound = |i: usize| i * n / chunks;
    (0..chunks).map(|i| bound(i)..bound(i + 1)).collect()
}

impl FittingBackend for ChunkedBackend {
    fn name(&self) -> &'static str {
        "chunked-parallel"
    }

    fn fit(&self, bank: &ModelBank, data: &dyn FunctionalDataSource) -> Result<Vec<FitResult>, PrfError> {
        check_inputs(bank, data)?;
        let scored = ScoredBank::new(bank);
        let ranges = chunk_ranges(data.n_voxels(), self.chunks);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.chunks)
            .build()
            .map_err(|e| PrfError::BackendUnavailable(format!("Failed to start worker pool: {e}")))?;

        let parts: Vec<BlockFit> = pool.install(|| {
            ranges
                .par_iter()
                .enumerate()
                .map(|(idx, range)| {
                    debug!(chunk = idx, start = range.start, end = range.end, "fitting chunk");
                    let block = data.read_chunk(range.clone())?;
                    Ok(scored.fit_block(&block))
                })
                .collect::<Result<Vec<_>, PrfError>>()
        })?;

        Ok(finish(self.name(), BlockFit::merge(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ranges_cover_everything_in_order() {
        let ranges = chunk_ranges(10, 4);
        assert_eq!(ranges, vec![0..2, 2..5, 5..7, 7..10]);

        let ranges = chunk_ranges(2, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), 2);
        assert_eq!(ranges.last().unwrap().end, 2);

        assert_eq!(chunk_ranges(0, 3), vec![0..0, 0..0, 0..0]);
    }

    #[test]
    fn zero_chunks_rejected() {
        assert!(matches!(ChunkedBackend::new(0), Err(PrfError::Configuration(_))));
    }
}
