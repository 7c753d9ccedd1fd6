//! Write fit outputs: parameter maps as NIfTI volumes and a per-voxel CSV.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::Mask;
use crate::error::PrfError;
use crate::fit::FitResult;
use crate::io::nifti::{DataType, Geometry, Volume, write_nifti};
use crate::report::PrfMaps;

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Write every map as `<base><suffix>.nii`; returns the written paths.
pub fn write_maps(base: &Path, maps: &PrfMaps, geometry: &Geometry) -> Result<Vec<PathBuf>, PrfError> {
    if let Some(dir) = base.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| PrfError::io("create output directory", dir, e))?;
    }
    let mut written = Vec::new();
    for (kind, values) in maps.iter() {
        let path = with_suffix(base, &format!("{}.nii", kind.suffix()));
        let volume = Volume::new(maps.dims(), 1, values.to_vec(), geometry.clone())?;
        write_nifti(&path, &volume, DataType::F32)?;
        written.push(path);
    }
    info!(base = %base.display(), maps = written.len(), "parameter maps written");
    Ok(written)
}

/// Write one CSV row per fitted voxel, with its volume coordinates.
pub fn write_results_csv(path: &Path, mask: &Mask, results: &[FitResult]) -> Result<(), PrfError> {
    let file = File::create(path).map_err(|e| PrfError::io("create results CSV", path, e))?;
    let mut w = BufWriter::new(file);
    let [nx, ny, _] = mask.dims();

    writeln!(w, "voxel,i,j,k,candidate,x,y,sigma,amplitude,r2").map_err(|e| PrfError::io("write results CSV", path, e))?;
    for (&flat, r) in mask.indices().iter().zip(results) {
        let (i, j, k) = (flat % nx, (flat / nx) % ny, flat / (nx * ny));
        writeln!(
            w,
            "{flat},{i},{j},{k},{},{:.10},{:.10},{:.10},{:.10},{:.10}",
            r.candidate, r.x, r.y, r.sigma, r.amplitude, r.r2
        )
        .map_err(|e| PrfError::io("write results CSV", path, e))?;
    }
    w.flush().map_err(|e| PrfError::io("write results CSV", path, e))
}
