//! Run configuration.
//!
//! The configuration file is JSON with the established pRF option names
//! (`varNumX`, `lstPathNiiFunc`, ...), so existing analysis setups translate
//! one to one. Inside the crate the options are plain
//! snake_case fields, and each component receives only the immutable spec
//! struct it needs (`GridSpec`, `BankSpec`, `PreprocessSpec`).

use std::fs::File;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PrfError;
use crate::grid::GridSpec;
use crate::math::HrfParams;
use crate::models::BankSpec;
use crate::preprocess::PreprocessSpec;

/// Fitting backend selection (`strVersion`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-threaded reference implementation.
    Numpy,
    /// Voxels split into `varPar` chunks fitted in parallel.
    Cython,
    /// Bulk correlation on a GPU (requires the `gpu` feature and an adapter).
    Gpu,
    /// Bulk correlation on the host.
    Bulk,
}

fn default_true() -> bool {
    true
}

fn default_par() -> usize {
    1
}

fn default_zfill() -> usize {
    3
}

fn default_version() -> BackendKind {
    BackendKind::Cython
}

fn default_vox_res() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrfConfig {
    #[serde(rename = "varNumX")]
    pub num_x: usize,
    #[serde(rename = "varNumY")]
    pub num_y: usize,
    #[serde(rename = "varNumPrfSizes")]
    pub num_prf_sizes: usize,

    #[serde(rename = "varExtXmin")]
    pub ext_x_min: f64,
    #[serde(rename = "varExtXmax")]
    pub ext_x_max: f64,
    #[serde(rename = "varExtYmin")]
    pub ext_y_min: f64,
    #[serde(rename = "varExtYmax")]
    pub ext_y_max: f64,

    #[serde(rename = "varPrfStdMin")]
    pub prf_std_min: f64,
    #[serde(rename = "varPrfStdMax")]
    pub prf_std_max: f64,

    /// Repetition time (s).
    #[serde(rename = "varTr")]
    pub tr: f64,
    /// Voxel resolution (mm).
    #[serde(rename = "varVoxRes", default = "default_vox_res")]
    pub vox_res: f64,

    /// Temporal smoothing SD (s); zero disables.
    #[serde(rename = "varSdSmthTmp", default)]
    pub sd_smth_tmp: f64,
    /// Spatial smoothing SD (mm); zero disables.
    #[serde(rename = "varSdSmthSpt", default)]
    pub sd_smth_spt: f64,
    #[serde(rename = "lgcLinTrnd", default)]
    pub lin_trend: bool,
    /// Per-run z-scoring of functional data.
    #[serde(rename = "lgcZscr", default = "default_true")]
    pub zscore: bool,

    #[serde(rename = "varPar", default = "default_par")]
    pub par: usize,

    #[serde(rename = "varVslSpcSzeX")]
    pub vsl_spc_sze_x: usize,
    #[serde(rename = "varVslSpcSzeY")]
    pub vsl_spc_sze_y: usize,

    #[serde(rename = "lstPathNiiFunc", default)]
    pub path_nii_func: Vec<PathBuf>,
    #[serde(rename = "strPathNiiMask", default)]
    pub path_nii_mask: PathBuf,
    /// Output basename; map suffixes are appended.
    #[serde(rename = "strPathOut", default)]
    pub path_out: PathBuf,

    #[serde(rename = "strVersion", default = "default_version")]
    pub version: BackendKind,

    /// Build (true) or load (false) the model bank.
    #[serde(rename = "lgcCrteMdl", default = "default_true")]
    pub create_model: bool,
    /// Per-run stimulus frame path prefixes.
    #[serde(rename = "lstPathPng")]
    pub path_png: Vec<String>,
    #[serde(rename = "varStrtIdx", default)]
    pub start_idx: usize,
    #[serde(rename = "varZfill", default = "default_zfill")]
    pub zfill: usize,
    /// Model bank path without extension.
    #[serde(rename = "strPathMdl")]
    pub path_mdl: PathBuf,

    /// Stream functional data from a disk-backed store instead of memory.
    #[serde(rename = "lgcHdf5", default)]
    pub hdf5: bool,
}

impl PrfConfig {
    /// Load a JSON config file; relative paths are resolved against its directory.
    pub fn load(path: &Path) -> Result<Self, PrfError> {
        let file = File::open(path).map_err(|e| PrfError::io("open config", path, e))?;
        let mut config: PrfConfig = serde_json::from_reader(file)
            .map_err(|e| PrfError::config(format!("Invalid config '{}': {e}", path.display())))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), PrfError> {
        let file = File::create(path).map_err(|e| PrfError::io("create config", path, e))?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| PrfError::format(format!("Failed to write config JSON: {e}")))
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &PathBuf| -> PathBuf {
            if p.as_os_str().is_empty() || p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        };
        self.path_nii_func = self.path_nii_func.iter().map(join).collect();
        self.path_nii_mask = join(&self.path_nii_mask);
        self.path_out = join(&self.path_out);
        self.path_mdl = join(&self.path_mdl);
        self.path_png = self
            .path_png
            .iter()
            .map(|p| {
                let pb = PathBuf::from(p);
                if pb.is_absolute() {
                    p.clone()
                } else {
                    base.join(pb).to_string_lossy().into_owned()
                }
            })
            .collect();
    }

    /// Checks needed before building a model bank.
    pub fn validate_model(&self) -> Result<(), PrfError> {
        self.grid_spec().validate()?;
        if !(self.tr.is_finite() && self.tr > 0.0) {
            return Err(PrfError::config(format!("varTr must be > 0 (got {}).", self.tr)));
        }
        if !(self.sd_smth_tmp.is_finite() && self.sd_smth_tmp >= 0.0) {
            return Err(PrfError::config("varSdSmthTmp must be >= 0."));
        }
        if self.path_png.is_empty() {
            return Err(PrfError::config("lstPathPng must list at least one run."));
        }
        if self.path_mdl.as_os_str().is_empty() {
            return Err(PrfError::config("strPathMdl must be set."));
        }
        Ok(())
    }

    /// Full validation for a fitting run.
    pub fn validate(&self) -> Result<(), PrfError> {
        self.validate_model()?;
        if !(self.vox_res.is_finite() && self.vox_res > 0.0) {
            return Err(PrfError::config("varVoxRes must be > 0."));
        }
        if !(self.sd_smth_spt.is_finite() && self.sd_smth_spt >= 0.0) {
            return Err(PrfError::config("varSdSmthSpt must be >= 0."));
        }
        if self.par == 0 {
            return Err(PrfError::config("varPar must be >= 1."));
        }
        if self.path_nii_func.is_empty() {
            return Err(PrfError::config("lstPathNiiFunc must list at least one run."));
        }
        if self.path_nii_func.len() != self.path_png.len() {
            return Err(PrfError::config(format!(
                "lstPathNiiFunc has {} runs but lstPathPng has {}.",
                self.path_nii_func.len(),
                self.path_png.len()
            )));
        }
        if self.path_nii_mask.as_os_str().is_empty() {
            return Err(PrfError::config("strPathNiiMask must be set."));
        }
        if self.path_out.as_os_str().is_empty() {
            return Err(PrfError::config("strPathOut must be set."));
        }
        Ok(())
    }

    pub fn grid_spec(&self) -> GridSpec {
        GridSpec {
            num_x: self.num_x,
            num_y: self.num_y,
            num_sizes: self.num_prf_sizes,
            ext_x_min: self.ext_x_min,
            ext_x_max: self.ext_x_max,
            ext_y_min: self.ext_y_min,
            ext_y_max: self.ext_y_max,
            std_min: self.prf_std_min,
            std_max: self.prf_std_max,
            raster_x: self.vsl_spc_sze_x,
            raster_y: self.vsl_spc_sze_y,
        }
    }

    pub fn bank_spec(&self) -> BankSpec {
        BankSpec {
            tr: self.tr,
            sd_smth_tmp: self.sd_smth_tmp,
            hrf: HrfParams::default(),
        }
    }

    /// Preprocessing parameters, converted from SI units into samples/voxels.
    pub fn preprocess_spec(&self) -> PreprocessSpec {
        PreprocessSpec {
            lin_trend: self.lin_trend,
            sd_tmp_volumes: self.sd_smth_tmp / self.tr,
            sd_spt_voxels: self.sd_smth_spt / self.vox_res,
            zscore: self.zscore,
        }
    }
}
