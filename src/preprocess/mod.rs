//! Functional data preprocessing.
//!
//! Per run, in order:
//!
//! 1. spatial smoothing of every volume (before masking, so masked voxels
//!    still see their neighbours)
//! 2. restriction to mask-selected voxels (canonical voxel order)
//! 3. linear-trend removal, mean restored
//! 4. temporal smoothing
//! 5. z-scoring
//!
//! Runs are loaded and processed one at a time, in configured order, and each
//! run's block lands in its column range of a [`RunSink`]: an in-memory
//! `voxels × volumes` matrix or a memory-mapped store. At most one raw run is
//! resident at any time.

pub mod spatial;
pub mod temporal;

pub use spatial::*;
pub use temporal::*;

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::domain::Mask;
use crate::error::PrfError;
use crate::io::nifti::Volume;
use crate::io::store::MatrixStoreWriter;
use crate::math::{gaussian_kernel, smooth_in_place};

/// Destination for preprocessed runs, sized for the concatenated data.
pub trait RunSink {
    fn n_voxels(&self) -> usize;

    fn n_volumes(&self) -> usize;

    /// Store a `voxels × run volumes` block starting at column `offset`.
    fn put_run(&mut self, offset: usize, block: &DMatrix<f64>) -> Result<(), PrfError>;
}

impl RunSink for DMatrix<f64> {
    fn n_voxels(&self) -> usize {
        self.nrows()
    }

    fn n_volumes(&self) -> usize {
        self.ncols()
    }

    fn put_run(&mut self, offset: usize, block: &DMatrix<f64>) -> Result<(), PrfError> {
        self.columns_mut(offset, block.ncols()).copy_from(block);
        Ok(())
    }
}

impl RunSink for MatrixStoreWriter {
    fn n_voxels(&self) -> usize {
        self.rows()
    }

    fn n_volumes(&self) -> usize {
        self.cols()
    }

    fn put_run(&mut self, offset: usize, block: &DMatrix<f64>) -> Result<(), PrfError> {
        self.write_columns(offset, block)
    }
}

/// Preprocessing switches, already converted into samples and voxels.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessSpec {
    pub lin_trend: bool,
    /// Temporal smoothing SD in volumes; zero disables.
    pub sd_tmp_volumes: f64,
    /// Spatial smoothing SD in voxels; zero disables.
    pub sd_spt_voxels: f64,
    pub zscore: bool,
}

/// Preprocess one run into a `voxels × volumes` matrix.
pub fn preprocess_run(mut volume: Volume, mask: &Mask, spec: &PreprocessSpec) -> Result<DMatrix<f64>, PrfError> {
    if volume.dims != mask.dims() {
        return Err(PrfError::shape(format!(
            "Functional volume is {:?} but the mask is {:?}.",
            volume.dims,
            mask.dims()
        )));
    }
    if spec.sd_spt_voxels > 0.0 {
        smooth_volume(&mut volume, spec.sd_spt_voxels);
    }

    let mut series: Vec<Vec<f64>> = mask.indices().par_iter().map(|&i| volume.series(i)).collect();
    if spec.lin_trend {
        remove_linear_trend(&mut series)?;
    }
    let kernel = gaussian_kernel(spec.sd_tmp_volumes);
    series.par_iter_mut().for_each(|s| {
        smooth_in_place(s, &kernel);
        if spec.zscore {
            zscore(s);
        }
    });

    Ok(DMatrix::from_fn(series.len(), volume.nt, |v, t| series[v][t]))
}

/// Preprocess runs as they are loaded and write them side by side into `sink`.
///
/// The sink's width is the model bank's frame count; runs that overrun it or
/// leave it short are a shape mismatch.
pub fn preprocess_runs<I>(runs: I, mask: &Mask, spec: &PreprocessSpec, sink: &mut dyn RunSink) -> Result<(), PrfError>
where
    I: IntoIterator<Item = Result<Volume, PrfError>>,
{
    if sink.n_voxels() != mask.n_selected() {
        return Err(PrfError::shape(format!(
            "Sink holds {} voxels but the mask selects {}.",
            sink.n_voxels(),
            mask.n_selected()
        )));
    }
    let expected = sink.n_volumes();
    let mut offset = 0;
    for (r, run) in runs.into_iter().enumerate() {
        let run = run?;
        let nt = run.nt;
        if offset + nt > expected {
            return Err(PrfError::shape(format!(
                "Functional runs exceed the {expected} stimulus frames at run {}.",
                r + 1
            )));
        }
        let block = preprocess_run(run, mask, spec)?;
        sink.put_run(offset, &block)?;
        debug!(run = r + 1, volumes = nt, "run preprocessed");
        offset += nt;
    }
    if offset != expected {
        return Err(PrfError::shape(format!(
            "Functional runs have {offset} volumes but the stimulus has {expected} frames."
        )));
    }
    info!(voxels = sink.n_voxels(), volumes = expected, "functional data ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::io::nifti::Geometry;

    fn run(dims: [usize; 3], nt: usize, f: impl Fn(usize, usize) -> f64) -> Volume {
        let n = dims[0] * dims[1] * dims[2];
        let data = (0..n * nt).map(|i| f(i % n, i / n)).collect();
        Volume::new(dims, nt, data, Geometry::default()).unwrap()
    }

    fn plain() -> PreprocessSpec {
        PreprocessSpec {
            lin_trend: false,
            sd_tmp_volumes: 0.0,
            sd_spt_voxels: 0.0,
            zscore: false,
        }
    }

    #[test]
    fn masking_keeps_storage_order() {
        let mask = Mask::from_values([2, 2, 1], &[1.0, 0.0, 1.0, 1.0]).unwrap();
        let vol = run([2, 2, 1], 3, |v, t| (10 * v + t) as f64);
        let m = preprocess_run(vol, &mask, &plain()).unwrap();
        assert_eq!(m.shape(), (3, 3));
        assert_eq!(m.row(0).iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);
        assert_eq!(m.row(1).iter().copied().collect::<Vec<_>>(), vec![20.0, 21.0, 22.0]);
        assert_eq!(m[(2, 0)], 30.0);
    }

    #[test]
    fn runs_are_zscored_separately_then_concatenated() {
        let mask = Mask::from_values([1, 1, 1], &[1.0]).unwrap();
        let a = run([1, 1, 1], 4, |_, t| t as f64);
        let b = run([1, 1, 1], 4, |_, t| 100.0 + 10.0 * t as f64);
        let spec = PreprocessSpec {
            zscore: true,
            ..plain()
        };
        let mut m = DMatrix::<f64>::zeros(1, 8);
        preprocess_runs([Ok(a), Ok(b)], &mask, &spec, &mut m).unwrap();
        for t in 0..4 {
            assert!((m[(0, t)] - m[(0, t + 4)]).abs() < 1e-12);
        }
        let mean: f64 = (0..4).map(|t| m[(0, t)]).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
    }

    #[test]
    fn volume_total_must_match_stimulus_frames() {
        let mask = Mask::from_values([1, 1, 1], &[1.0]).unwrap();
        let short = run([1, 1, 1], 4, |_, t| t as f64);
        let err = preprocess_runs([Ok(short)], &mask, &plain(), &mut DMatrix::<f64>::zeros(1, 5)).unwrap_err();
        assert!(matches!(err, PrfError::ShapeMismatch(_)));

        let long = run([1, 1, 1], 6, |_, t| t as f64);
        let err = preprocess_runs([Ok(long)], &mask, &plain(), &mut DMatrix::<f64>::zeros(1, 5)).unwrap_err();
        assert!(matches!(err, PrfError::ShapeMismatch(_)));
    }

    /// Records how many runs the loader had produced when each block arrived.
    struct LoadOrder<'a> {
        inner: DMatrix<f64>,
        loaded: &'a Cell<usize>,
        seen: Vec<usize>,
    }

    impl RunSink for LoadOrder<'_> {
        fn n_voxels(&self) -> usize {
            self.inner.nrows()
        }

        fn n_volumes(&self) -> usize {
            self.inner.ncols()
        }

        fn put_run(&mut self, offset: usize, block: &DMatrix<f64>) -> Result<(), PrfError> {
            self.seen.push(self.loaded.get());
            self.inner.put_run(offset, block)
        }
    }

    #[test]
    fn each_run_is_stored_before_the_next_is_loaded() {
        let mask = Mask::from_values([2, 1, 1], &[1.0, 1.0]).unwrap();
        let loaded = Cell::new(0);
        let runs = (0..3).map(|r| {
            loaded.set(loaded.get() + 1);
            Ok(run([2, 1, 1], 2, move |v, t| (100 * r + 10 * v + t) as f64))
        });
        let mut sink = LoadOrder {
            inner: DMatrix::zeros(2, 6),
            loaded: &loaded,
            seen: Vec::new(),
        };
        preprocess_runs(runs, &mask, &plain(), &mut sink).unwrap();
        assert_eq!(sink.seen, vec![1, 2, 3]);
        assert_eq!(sink.inner[(1, 5)], 211.0);
    }

    #[test]
    fn store_sink_matches_in_memory_concatenation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("func.bin");
        let mask = Mask::from_values([3, 1, 1], &[1.0, 0.0, 1.0]).unwrap();
        let make = || (0..2).map(|r| Ok(run([3, 1, 1], 5, move |v, t| ((r + 1) * (v + 1) * t * t) as f64)));
        let spec = PreprocessSpec {
            lin_trend: true,
            zscore: true,
            ..plain()
        };

        let mut memory = DMatrix::<f64>::zeros(2, 10);
        preprocess_runs(make(), &mask, &spec, &mut memory).unwrap();
        let mut store = MatrixStoreWriter::create(&path, 2, 10).unwrap();
        preprocess_runs(make(), &mask, &spec, &mut store).unwrap();
        let written = store.finish().unwrap();

        let stored = crate::io::store::MatrixStore::open(&written).unwrap().to_matrix().unwrap();
        assert_eq!(stored, memory);
    }

    #[test]
    fn load_errors_stop_the_stream() {
        let mask = Mask::from_values([1, 1, 1], &[1.0]).unwrap();
        let runs = [Ok(run([1, 1, 1], 2, |_, t| t as f64)), Err(PrfError::format("bad run"))];
        let err = preprocess_runs(runs, &mask, &plain(), &mut DMatrix::<f64>::zeros(1, 4)).unwrap_err();
        assert!(matches!(err, PrfError::Format(_)));
    }

    #[test]
    fn functional_and_mask_dims_must_agree() {
        let mask = Mask::from_values([2, 1, 1], &[1.0, 1.0]).unwrap();
        let vol = run([1, 2, 1], 2, |_, _| 0.0);
        assert!(matches!(preprocess_run(vol, &mask, &plain()), Err(PrfError::ShapeMismatch(_))));
    }

    #[test]
    fn empty_mask_gives_empty_matrix() {
        let mask = Mask::from_values([2, 1, 1], &[0.0, 0.0]).unwrap();
        let vol = run([2, 1, 1], 5, |v, t| (v + t) as f64);
        let spec = PreprocessSpec {
            lin_trend: true,
            zscore: true,
            ..plain()
        };
        let mut m = DMatrix::<f64>::zeros(0, 5);
        preprocess_runs([Ok(vol)], &mask, &spec, &mut m).unwrap();
        assert_eq!(m.shape(), (0, 5));
    }
}
