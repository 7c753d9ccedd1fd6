//! Synthetic pRF dataset generation.
//!
//! Writes a complete, self-consistent study directory:
//!
//! ```text
//! <dir>/config.json
//! <dir>/mask.nii
//! <dir>/func_run<r>.nii          4D, one per run
//! <dir>/frames/run<r>_<idx>.png  bar sweeps
//! ```
//!
//! Each masked voxel is a scaled, offset copy of one randomly drawn model-bank
//! candidate plus Gaussian noise, so a fit should recover the drawn candidate.

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::info;

use crate::domain::{BackendKind, Mask, PrfConfig};
use crate::error::PrfError;
use crate::grid::VisualSpaceGrid;
use crate::io::nifti::{DataType, Geometry, Volume, write_nifti};
use crate::io::stimulus::{frame_path, write_frame};
use crate::models::{StimulusSequence, build_model_bank};

#[derive(Debug, Clone)]
pub struct SynthSpec {
    pub seed: u64,
    /// Functional volume dimensions.
    pub dims: [usize; 3],
    pub runs: usize,
    pub frames_per_run: usize,
    /// Noise SD relative to a unit-gain response.
    pub noise_sd: f64,
    /// Fraction of voxels inside the mask.
    pub mask_fraction: f64,
}

impl Default for SynthSpec {
    fn default() -> Self {
        Self {
            seed: 7,
            dims: [4, 4, 2],
            runs: 2,
            frames_per_run: 40,
            noise_sd: 0.02,
            mask_fraction: 0.75,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthDataset {
    pub config_path: PathBuf,
    pub config: PrfConfig,
    pub mask: Mask,
    /// Planted candidate per mask voxel (canonical order).
    pub truth: Vec<usize>,
}

fn synth_config(spec: &SynthSpec) -> PrfConfig {
    PrfConfig {
        num_x: 6,
        num_y: 6,
        num_prf_sizes: 3,
        ext_x_min: -6.0,
        ext_x_max: 6.0,
        ext_y_min: -6.0,
        ext_y_max: 6.0,
        prf_std_min: 0.75,
        prf_std_max: 2.25,
        tr: 2.0,
        vox_res: 2.0,
        sd_smth_tmp: 0.0,
        sd_smth_spt: 0.0,
        lin_trend: false,
        zscore: true,
        par: 2,
        vsl_spc_sze_x: 24,
        vsl_spc_sze_y: 24,
        path_nii_func: (1..=spec.runs).map(|r| PathBuf::from(format!("func_run{r}.nii"))).collect(),
        path_nii_mask: PathBuf::from("mask.nii"),
        path_out: PathBuf::from("out/prf"),
        version: BackendKind::Cython,
        create_model: true,
        path_png: (1..=spec.runs).map(|r| format!("frames/run{r}_")).collect(),
        start_idx: 1,
        zfill: 3,
        path_mdl: PathBuf::from("models/bank"),
        hdf5: false,
    }
}

/// Bar sweeps: left to right, then top to bottom, then blank; shifted per run.
pub fn bar_sweep(raster: usize, run: usize, frames: usize) -> Vec<DMatrix<f64>> {
    let half = raster / 2;
    let cycle = 2 * half + 6;
    (0..frames)
        .map(|f| {
            let phase = (f + run * 5) % cycle;
            DMatrix::from_fn(raster, raster, |r, c| {
                let hit = if phase < half {
                    c / 2 == phase
                } else if phase < 2 * half {
                    r / 2 == phase - half
                } else {
                    false
                };
                if hit { 1.0 } else { 0.0 }
            })
        })
        .collect()
}

pub fn write_synthetic_dataset(dir: &Path, spec: &SynthSpec) -> Result<SynthDataset, PrfError> {
    if spec.runs == 0 || spec.frames_per_run == 0 {
        return Err(PrfError::config("Synthetic dataset needs at least one run and one frame."));
    }
    let config = synth_config(spec);
    let raster = config.vsl_spc_sze_x;
    fs::create_dir_all(dir.join("frames")).map_err(|e| PrfError::io("create dataset directory", dir, e))?;

    let mut runs = Vec::with_capacity(spec.runs);
    for (r, prefix) in config.path_png.iter().enumerate() {
        let frames = bar_sweep(raster, r, spec.frames_per_run);
        for (k, frame) in frames.iter().enumerate() {
            write_frame(&dir.join(frame_path(prefix, config.start_idx + k, config.zfill)), frame)?;
        }
        runs.push(frames);
    }
    let stimulus = StimulusSequence::new(raster, raster, runs)?;
    let grid = VisualSpaceGrid::new(&config.grid_spec())?;
    let bank = build_model_bank(&grid, &stimulus, &config.bank_spec(), config.path_png.clone())?;

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let noise = Normal::new(0.0, spec.noise_sd.max(0.0))
        .map_err(|e| PrfError::config(format!("Invalid noise SD: {e}")))?;

    let n_vox = spec.dims[0] * spec.dims[1] * spec.dims[2];
    let mut selected: Vec<bool> = (0..n_vox).map(|_| rng.gen_bool(spec.mask_fraction.clamp(0.0, 1.0))).collect();
    if n_vox > 0 && !selected.iter().any(|&s| s) {
        selected[0] = true;
    }
    let mask = Mask::new(spec.dims, selected)?;

    // Peak response scale of the bank, so the noise SD is relative to signal.
    let peak = bank.values().iter().fold(0.0f64, |m, v| m.max(v.abs())).max(f64::MIN_POSITIVE);
    let mut truth = Vec::with_capacity(mask.n_selected());
    let mut series = vec![Vec::new(); n_vox];
    for (flat, s) in series.iter_mut().enumerate() {
        let baseline = rng.gen_range(100.0..200.0);
        let signal = if mask.is_selected(flat) {
            let c = rng.gen_range(0..bank.n_candidates());
            truth.push(c);
            let gain = rng.gen_range(1.0..3.0) / peak;
            bank.time_course(c).into_iter().map(|v| gain * v).collect()
        } else {
            vec![0.0; bank.n_volumes()]
        };
        *s = signal.into_iter().map(|v| baseline + v + noise.sample(&mut rng)).collect();
    }

    let geometry = Geometry {
        pixdim: [1.0, 2.0, 2.0, 2.0, config.tr as f32, 1.0, 1.0, 1.0],
        xyzt_units: 2 | 8,
        ..Geometry::default()
    };
    let mut offset = 0;
    for (r, path) in config.path_nii_func.iter().enumerate() {
        let nt = bank.run_lengths()[r];
        let mut data = vec![0.0; n_vox * nt];
        for t in 0..nt {
            for (flat, s) in series.iter().enumerate() {
                data[t * n_vox + flat] = s[offset + t];
            }
        }
        write_nifti(&dir.join(path), &Volume::new(spec.dims, nt, data, geometry.clone())?, DataType::F32)?;
        offset += nt;
    }
    let mask_values = (0..n_vox).map(|i| if mask.is_selected(i) { 1.0 } else { 0.0 }).collect();
    write_nifti(
        &dir.join(&config.path_nii_mask),
        &Volume::new(spec.dims, 1, mask_values, geometry)?,
        DataType::U8,
    )?;

    let config_path = dir.join("config.json");
    config.save(&config_path)?;
    info!(dir = %dir.display(), voxels = mask.n_selected(), "synthetic dataset written");

    Ok(SynthDataset {
        config_path,
        config,
        mask,
        truth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_sweep_has_blank_frames_and_moving_bars() {
        let frames = bar_sweep(24, 0, 30);
        assert_eq!(frames.len(), 30);
        let lit = |f: &DMatrix<f64>| f.iter().filter(|&&v| v > 0.0).count();
        assert_eq!(lit(&frames[0]), 48);
        assert_eq!(lit(&frames[12]), 48);
        assert_eq!(lit(&frames[24]), 0);
        assert_ne!(frames[0], frames[1]);
    }

    #[test]
    fn dataset_files_are_complete() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SynthSpec {
            frames_per_run: 12,
            ..SynthSpec::default()
        };
        let ds = write_synthetic_dataset(dir.path(), &spec).unwrap();
        assert!(ds.config_path.is_file());
        assert!(dir.path().join("mask.nii").is_file());
        assert!(dir.path().join("func_run2.nii").is_file());
        assert!(dir.path().join("frames/run1_001.png").is_file());
        assert!(dir.path().join("frames/run2_012.png").is_file());
        assert!(!dir.path().join("frames/run2_013.png").exists());
        assert_eq!(ds.truth.len(), ds.mask.n_selected());
        assert!(ds.mask.n_selected() >= 1);
    }
}
