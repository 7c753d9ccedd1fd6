//! pRF fitting engine.
//!
//! Responsibilities:
//!
//! - score every voxel against every model-bank candidate (`score`)
//! - run that search with one of three interchangeable schedules:
//!   sequential, chunked-parallel, accelerated bulk correlation
//! - resolve the configured backend once, before any work starts (`backend`)

pub mod accelerated;
pub mod backend;
pub mod chunked;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod score;
pub mod sequential;

pub use accelerated::*;
pub use backend::*;
pub use chunked::*;
pub use score::*;
pub use sequential::*;

#[cfg(test)]
pub(crate) mod tests {
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    use super::*;
    use crate::domain::BackendKind;
    use crate::io::InMemorySource;
    use crate::models::ModelBank;
    use crate::models::bank::tests::build_test_bank;

    /// Voxels built from random candidates with a random gain, offset and Gaussian noise.
    pub(crate) fn noisy_voxels(bank: &ModelBank, n_voxels: usize, noise_sd: f64, seed: u64) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, noise_sd).unwrap();
        let mut out = DMatrix::zeros(n_voxels, bank.n_volumes());
        for v in 0..n_voxels {
            let c = rng.gen_range(0..bank.n_candidates());
            let gain = rng.gen_range(0.5..3.0);
            let offset = rng.gen_range(-10.0..10.0);
            let tc = bank.time_course(c);
            for t in 0..bank.n_volumes() {
                out[(v, t)] = offset + gain * tc[t] + noise.sample(&mut rng);
            }
        }
        out
    }

    #[test]
    fn backends_agree_on_every_voxel() {
        let bank = build_test_bank(4, 3, 2, 20);
        let mut values = noisy_voxels(&bank, 45, 0.5, 7);
        values.row_mut(3).fill(4.2);
        values.row_mut(30).fill(0.0);
        let data = InMemorySource::new(values);

        let reference = resolve_backend(BackendKind::Numpy, 1).unwrap().fit(&bank, &data).unwrap();
        for v in [3, 30] {
            assert_eq!((reference[v].candidate, reference[v].r2, reference[v].amplitude), (0, 0.0, 0.0));
        }
        for (kind, par) in [(BackendKind::Cython, 1), (BackendKind::Cython, 4), (BackendKind::Bulk, 1)] {
            let results = resolve_backend(kind, par).unwrap().fit(&bank, &data).unwrap();
            assert_eq!(results, reference, "{kind:?} with {par} chunks");
        }
    }

    #[test]
    fn more_chunks_than_voxels() {
        let bank = build_test_bank(3, 2, 1, 15);
        let data = InMemorySource::new(noisy_voxels(&bank, 3, 0.2, 5));
        let one = ChunkedBackend::new(1).unwrap().fit(&bank, &data).unwrap();
        let eight = ChunkedBackend::new(8).unwrap().fit(&bank, &data).unwrap();
        assert_eq!(one, eight);
    }

    #[test]
    fn empty_data_yields_no_results() {
        let bank = build_test_bank(3, 2, 1, 15);
        let data = InMemorySource::new(DMatrix::zeros(0, 15));
        for kind in [BackendKind::Numpy, BackendKind::Cython, BackendKind::Bulk] {
            let results = resolve_backend(kind, 2).unwrap().fit(&bank, &data).unwrap();
            assert!(results.is_empty());
        }
    }

    #[test]
    fn volume_mismatch_is_rejected() {
        let bank = build_test_bank(3, 2, 1, 15);
        let data = InMemorySource::new(DMatrix::zeros(4, 14));
        let err = SequentialBackend.fit(&bank, &data).unwrap_err();
        assert!(matches!(err, crate::error::PrfError::ShapeMismatch(_)));
    }

    #[test]
    fn planted_candidate_recovered_by_all_backends() {
        let bank = build_test_bank(10, 10, 2, 50);
        let tc = bank.time_course(37);
        let mut values = DMatrix::from_fn(5, bank.n_volumes(), |v, t| ((v * 7 + t * 3) % 11) as f64);
        for t in 0..bank.n_volumes() {
            values[(0, t)] = 2.0 * tc[t];
        }
        let data = InMemorySource::new(values);
        for kind in [BackendKind::Numpy, BackendKind::Cython, BackendKind::Bulk] {
            let results = resolve_backend(kind, 3).unwrap().fit(&bank, &data).unwrap();
            assert_eq!(results.len(), 5);
            assert_eq!(results[0].candidate, 37);
            assert!((results[0].r2 - 1.0).abs() < 1e-9);
            assert!((results[0].amplitude - 2.0).abs() < 1e-9);
        }
    }
}
