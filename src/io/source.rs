//! Functional data access for the fitting backends.
//!
//! Backends never see the whole dataset at once: they ask for contiguous voxel
//! ranges and receive a `voxels × volumes` block. The in-memory source simply
//! slices a matrix; the disk-backed source reads the same rows from a memory
//! mapped store that was filled run by run, so the concatenated data never
//! has to be resident.

use std::ops::Range;
use std::path::Path;

use nalgebra::DMatrix;
use tracing::debug;

use crate::error::PrfError;
use crate::io::store::MatrixStore;

/// Voxel-major functional data, shared read-only across workers.
pub trait FunctionalDataSource: Send + Sync {
    fn n_voxels(&self) -> usize;

    fn n_volumes(&self) -> usize;

    /// Rows `voxels` of the data, one row per voxel.
    fn read_chunk(&self, voxels: Range<usize>) -> Result<DMatrix<f64>, PrfError>;
}

#[derive(Debug, Clone)]
pub struct InMemorySource {
    data: DMatrix<f64>,
}

impl InMemorySource {
    pub fn new(data: DMatrix<f64>) -> Self {
        Self { data }
    }
}

impl FunctionalDataSource for InMemorySource {
    fn n_voxels(&self) -> usize {
        self.data.nrows()
    }

    fn n_volumes(&self) -> usize {
        self.data.ncols()
    }

    fn read_chunk(&self, voxels: Range<usize>) -> Result<DMatrix<f64>, PrfError> {
        if voxels.start > voxels.end || voxels.end > self.data.nrows() {
            return Err(PrfError::shape(format!(
                "Voxels {voxels:?} out of range for {} voxels.",
                self.data.nrows()
            )));
        }
        Ok(self.data.rows(voxels.start, voxels.len()).into_owned())
    }
}

#[derive(Debug)]
pub struct DiskBackedSource {
    store: MatrixStore,
}

impl DiskBackedSource {
    pub fn open(path: &Path) -> Result<Self, PrfError> {
        let store = MatrixStore::open(path)?;
        debug!(path = %path.display(), voxels = store.rows(), volumes = store.cols(), "functional data store opened");
        Ok(Self { store })
    }
}

impl FunctionalDataSource for DiskBackedSource {
    fn n_voxels(&self) -> usize {
        self.store.rows()
    }

    fn n_volumes(&self) -> usize {
        self.store.cols()
    }

    fn read_chunk(&self, voxels: Range<usize>) -> Result<DMatrix<f64>, PrfError> {
        self.store.read_rows(voxels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::write_matrix_store;

    #[test]
    fn disk_and_memory_sources_return_the_same_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("func.bin");
        let data = DMatrix::from_fn(9, 4, |v, t| (v as f64).sin() + t as f64);
        let mem = InMemorySource::new(data.clone());
        write_matrix_store(&path, &data).unwrap();
        let disk = DiskBackedSource::open(&path).unwrap();

        assert_eq!(disk.n_voxels(), 9);
        assert_eq!(disk.n_volumes(), 4);
        for range in [0..3, 3..9, 5..5] {
            assert_eq!(mem.read_chunk(range.clone()).unwrap(), disk.read_chunk(range).unwrap());
        }
    }

    #[test]
    fn out_of_range_chunk_is_rejected() {
        let mem = InMemorySource::new(DMatrix::zeros(3, 2));
        assert!(matches!(mem.read_chunk(2..4), Err(PrfError::ShapeMismatch(_))));
    }
}
