use std::path::Path;

use nalgebra::DMatrix;
use prf_mapper::app::pipeline::{build_bank, output_path, run_fit};
use prf_mapper::data::{SynthDataset, SynthSpec, write_synthetic_dataset};
use prf_mapper::domain::{BackendKind, PrfConfig};
use prf_mapper::error::PrfError;
use prf_mapper::io::nifti::{DataType, Geometry, Volume, read_nifti, write_nifti};
use prf_mapper::io::store::MatrixStore;
use prf_mapper::preprocess::preprocess_runs;
use prf_mapper::report::{MapKind, SENTINEL};

fn dataset(dir: &Path) -> (SynthDataset, PrfConfig) {
    let spec = SynthSpec {
        frames_per_run: 30,
        ..SynthSpec::default()
    };
    let ds = write_synthetic_dataset(dir, &spec).unwrap();
    let config = PrfConfig::load(&ds.config_path).unwrap();
    (ds, config)
}

#[test]
fn synthetic_dataset_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let (ds, config) = dataset(dir.path());

    let run = run_fit(&config).unwrap();
    assert_eq!(run.results.len(), ds.mask.n_selected());
    assert_eq!(run.candidates, 6 * 6 * 3);

    let hits = run.results.iter().zip(&ds.truth).filter(|(r, t)| r.candidate == **t).count();
    assert!(3 * hits >= ds.truth.len(), "recovered {hits} of {}", ds.truth.len());
    let mean_r2 = run.results.iter().map(|r| r.r2).sum::<f64>() / run.results.len() as f64;
    assert!(mean_r2 > 0.8, "mean R2 {mean_r2}");

    assert_eq!(run.written.len(), 7);
    let r2 = read_nifti(&output_path(&config, "_R2.nii")).unwrap();
    assert_eq!(r2.dims, ds.mask.dims());
    for (flat, v) in r2.data.iter().enumerate() {
        if !ds.mask.is_selected(flat) {
            assert_eq!(*v, SENTINEL);
        }
    }
    assert!(dir.path().join("models/bank.json").is_file());
    assert!(dir.path().join("models/bank.bin").is_file());
}

#[test]
fn cached_bank_gives_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut config) = dataset(dir.path());

    let built = run_fit(&config).unwrap();
    config.create_model = false;
    let loaded = run_fit(&config).unwrap();
    assert_eq!(built.results, loaded.results);
    assert_eq!(built.maps, loaded.maps);
}

#[test]
fn every_backend_and_storage_mode_agrees() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut config) = dataset(dir.path());
    config.version = BackendKind::Numpy;
    let reference = run_fit(&config).unwrap().results;
    config.create_model = false;

    for (kind, par, hdf5) in [
        (BackendKind::Cython, 1, false),
        (BackendKind::Cython, 4, false),
        (BackendKind::Bulk, 1, false),
        (BackendKind::Cython, 3, true),
    ] {
        config.version = kind;
        config.par = par;
        config.hdf5 = hdf5;
        let results = run_fit(&config).unwrap().results;
        assert_eq!(results, reference, "{kind:?} par={par} disk={hdf5}");
    }
    assert!(output_path(&config, "_func.bin").is_file());
}

#[test]
fn disk_mode_fits_from_the_run_by_run_store() {
    let dir = tempfile::tempdir().unwrap();
    let (ds, mut config) = dataset(dir.path());
    config.hdf5 = true;
    let on_disk = run_fit(&config).unwrap();

    let store = MatrixStore::open(&output_path(&config, "_func.bin")).unwrap();
    assert_eq!((store.rows(), store.cols()), (ds.mask.n_selected(), 60));

    let mut expected = DMatrix::<f64>::zeros(ds.mask.n_selected(), 60);
    let runs = config.path_nii_func.iter().map(|path| read_nifti(path));
    preprocess_runs(runs, &ds.mask, &config.preprocess_spec(), &mut expected).unwrap();
    assert_eq!(store.to_matrix().unwrap(), expected);

    config.hdf5 = false;
    assert_eq!(run_fit(&config).unwrap().results, on_disk.results);
}

#[test]
fn empty_mask_gives_empty_results_and_sentinel_maps() {
    let dir = tempfile::tempdir().unwrap();
    let (ds, config) = dataset(dir.path());
    let dims = ds.mask.dims();
    let empty = Volume::new(dims, 1, vec![0.0; ds.mask.n_total()], Geometry::default()).unwrap();
    write_nifti(&config.path_nii_mask, &empty, DataType::U8).unwrap();

    let run = run_fit(&config).unwrap();
    assert!(run.results.is_empty());
    assert!(run.maps.get(MapKind::XPos).iter().all(|&v| v == SENTINEL));
}

#[test]
fn grid_not_dividing_raster_fails_before_building() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut config) = dataset(dir.path());
    config.num_x = 5;

    assert!(matches!(run_fit(&config), Err(PrfError::Configuration(_))));
    assert!(matches!(build_bank(&config), Err(PrfError::Configuration(_))));
    assert!(!dir.path().join("models/bank.bin").exists());
}

#[test]
fn loading_without_a_stored_bank_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut config) = dataset(dir.path());
    config.create_model = false;

    let err = run_fit(&config).unwrap_err();
    assert!(matches!(err, PrfError::ModelBankMissing(_)));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn stored_bank_for_other_timing_is_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut config) = dataset(dir.path());
    build_bank(&config).unwrap();

    config.create_model = false;
    config.sd_smth_tmp = 2.0;
    assert!(matches!(run_fit(&config), Err(PrfError::ModelBankMissing(_))));
}

#[test]
fn volume_count_must_match_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = dataset(dir.path());
    std::fs::remove_file(dir.path().join("frames/run2_030.png")).unwrap();

    let err = run_fit(&config).unwrap_err();
    assert!(matches!(err, PrfError::ShapeMismatch(_)));
    assert!(!dir.path().join("models/bank.bin").exists());
}
