//! The fitting pipeline shared by the `fit` and `model` commands.
//!
//! Order of work:
//!
//! 1. validate the configuration and resolve the backend (fail fast)
//! 2. load the mask, check each functional run's header against the mask and
//!    the stimulus frame counts
//! 3. build and store, or load, the model bank
//! 4. load and preprocess runs one at a time into memory, or into the
//!    `<strPathOut>_func.bin` store when `lgcHdf5` is set
//! 5. fit, assemble parameter maps, write them
//!
//! Every check that can fail cheaply runs before the model bank is built.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use nalgebra::DMatrix;
use tracing::info;

use crate::domain::{Mask, PrfConfig};
use crate::error::PrfError;
use crate::fit::{FitResult, FittingBackend, resolve_backend};
use crate::grid::VisualSpaceGrid;
use crate::io::nifti::{Volume, read_nifti, read_nifti_shape};
use crate::io::stimulus::{count_frames, load_stimulus};
use crate::io::store::MatrixStoreWriter;
use crate::io::{DiskBackedSource, FileModelCache, FunctionalDataSource, InMemorySource, ModelBankRepository, write_maps};
use crate::models::{ModelBank, ModelKey, build_model_bank};
use crate::preprocess::preprocess_runs;
use crate::report::{PrfMaps, assemble};

/// All outputs of a single `prf fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub backend: &'static str,
    pub candidates: usize,
    pub mask: Mask,
    /// One result per mask voxel, canonical order.
    pub results: Vec<FitResult>,
    pub maps: PrfMaps,
    pub written: Vec<PathBuf>,
}

/// `<strPathOut><suffix>`.
pub fn output_path(config: &PrfConfig, suffix: &str) -> PathBuf {
    let mut s: OsString = config.path_out.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Frames per run, counted on disk.
fn run_lengths(config: &PrfConfig) -> Result<Vec<usize>, PrfError> {
    config
        .path_png
        .iter()
        .enumerate()
        .map(|(r, prefix)| match count_frames(prefix, config.start_idx, config.zfill) {
            0 => Err(PrfError::config(format!("Run {}: no stimulus frames with prefix '{prefix}'.", r + 1))),
            n => Ok(n),
        })
        .collect()
}

/// Key of the bank this configuration would build.
pub fn model_key(config: &PrfConfig) -> Result<ModelKey, PrfError> {
    Ok(ModelKey {
        grid: config.grid_spec(),
        bank: config.bank_spec(),
        stimulus: config.path_png.clone(),
        run_lengths: run_lengths(config)?,
    })
}

/// Build the model bank from the stimulus frames and store it.
pub fn build_bank(config: &PrfConfig) -> Result<ModelBank, PrfError> {
    config.validate_model()?;
    let grid = VisualSpaceGrid::new(&config.grid_spec())?;
    let stimulus = load_stimulus(config)?;
    let bank = build_model_bank(&grid, &stimulus, &config.bank_spec(), config.path_png.clone())?;
    FileModelCache::new(&config.path_mdl).put(&bank)?;
    Ok(bank)
}

/// Build (`lgcCrteMdl`) or load the model bank.
pub fn obtain_bank(config: &PrfConfig) -> Result<ModelBank, PrfError> {
    if config.create_model {
        build_bank(config)
    } else {
        config.validate_model()?;
        FileModelCache::new(&config.path_mdl).get(&model_key(config)?)
    }
}

fn load_mask(config: &PrfConfig) -> Result<(Mask, Volume), PrfError> {
    let volume = read_nifti(&config.path_nii_mask)?;
    if volume.nt != 1 {
        return Err(PrfError::shape(format!(
            "Mask '{}' has {} volumes, expected 1.",
            config.path_nii_mask.display(),
            volume.nt
        )));
    }
    let mask = Mask::from_values(volume.dims, &volume.data)?;
    Ok((mask, volume))
}

/// Check every run's header against the mask and the stimulus; returns volumes per run.
fn check_runs(config: &PrfConfig, mask: &Mask) -> Result<Vec<usize>, PrfError> {
    let lengths = run_lengths(config)?;
    for (r, path) in config.path_nii_func.iter().enumerate() {
        let (dims, nt) = read_nifti_shape(path)?;
        if dims != mask.dims() {
            return Err(PrfError::shape(format!(
                "'{}' is {:?} but the mask is {:?}.",
                path.display(),
                dims,
                mask.dims()
            )));
        }
        if nt != lengths[r] {
            return Err(PrfError::shape(format!(
                "Run {}: '{}' has {} volumes but {} stimulus frames.",
                r + 1,
                path.display(),
                nt,
                lengths[r]
            )));
        }
    }
    Ok(lengths)
}

/// Execute the full fitting pipeline.
pub fn run_fit(config: &PrfConfig) -> Result<RunOutput, PrfError> {
    config.validate()?;
    let backend: Box<dyn FittingBackend> = resolve_backend(config.version, config.par)?;

    let (mask, mask_volume) = load_mask(config)?;
    let run_volumes = check_runs(config, &mask)?;
    info!(voxels = mask.n_selected(), runs = run_volumes.len(), "functional runs checked");

    let bank = obtain_bank(config)?;
    let runs = config.path_nii_func.iter().map(|path| read_nifti(path));
    let spec = config.preprocess_spec();

    let results = if config.hdf5 {
        let path = output_path(config, "_func.bin");
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| PrfError::io("create output directory", dir, e))?;
        }
        let mut store = MatrixStoreWriter::create(&path, mask.n_selected(), bank.n_volumes())?;
        preprocess_runs(runs, &mask, &spec, &mut store)?;
        let source = DiskBackedSource::open(&store.finish()?)?;
        fit_with(backend.as_ref(), &bank, &source)?
    } else {
        let mut data = DMatrix::<f64>::zeros(mask.n_selected(), bank.n_volumes());
        preprocess_runs(runs, &mask, &spec, &mut data)?;
        fit_with(backend.as_ref(), &bank, &InMemorySource::new(data))?
    };

    let maps = assemble(&mask, &results)?;
    let written = write_maps(&config.path_out, &maps, &mask_volume.geometry)?;

    Ok(RunOutput {
        backend: backend.name(),
        candidates: bank.n_candidates(),
        mask,
        results,
        maps,
        written,
    })
}

fn fit_with(
    backend: &dyn FittingBackend,
    bank: &ModelBank,
    data: &dyn FunctionalDataSource,
) -> Result<Vec<FitResult>, PrfError> {
    info!(backend = backend.name(), voxels = data.n_voxels(), candidates = bank.n_candidates(), "fitting");
    backend.fit(bank, data)
}
