//! Stimulus frames on disk.
//!
//! Each run is a numbered PNG sequence `<prefix><index>.png`, the index
//! zero-padded to `varZfill` digits and starting at `varStrtIdx`. A run has as
//! many frames as there are consecutive files from the start index.

use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use nalgebra::DMatrix;
use tracing::{debug, info};

use crate::domain::PrfConfig;
use crate::error::PrfError;
use crate::models::StimulusSequence;

pub fn frame_path(prefix: &str, index: usize, zfill: usize) -> PathBuf {
    PathBuf::from(format!("{prefix}{index:0zfill$}.png"))
}

/// Number of consecutive frames present from `start`.
pub fn count_frames(prefix: &str, start: usize, zfill: usize) -> usize {
    (start..).take_while(|&i| frame_path(prefix, i, zfill).is_file()).count()
}

/// Load one frame as a binary raster (`1.0` where luma > 0).
pub fn load_frame(path: &Path, raster_x: usize, raster_y: usize) -> Result<DMatrix<f64>, PrfError> {
    let img = image::open(path)
        .map_err(|e| PrfError::format(format!("Failed to decode frame '{}': {e}", path.display())))?
        .to_luma8();
    let (w, h) = (img.width() as usize, img.height() as usize);
    if w != raster_x || h != raster_y {
        return Err(PrfError::shape(format!(
            "Frame '{}' is {w}x{h} px, expected {raster_x}x{raster_y}.",
            path.display()
        )));
    }
    Ok(DMatrix::from_fn(h, w, |r, c| {
        if img.get_pixel(c as u32, r as u32).0[0] > 0 { 1.0 } else { 0.0 }
    }))
}

/// Write a binary raster as an 8-bit grayscale PNG.
pub fn write_frame(path: &Path, frame: &DMatrix<f64>) -> Result<(), PrfError> {
    let img = GrayImage::from_fn(frame.ncols() as u32, frame.nrows() as u32, |c, r| {
        Luma([if frame[(r as usize, c as usize)] > 0.0 { 255 } else { 0 }])
    });
    img.save(path)
        .map_err(|e| PrfError::format(format!("Failed to encode frame '{}': {e}", path.display())))
}

/// Load every run listed in `lstPathPng`.
pub fn load_stimulus(config: &PrfConfig) -> Result<StimulusSequence, PrfError> {
    let (rx, ry) = (config.vsl_spc_sze_x, config.vsl_spc_sze_y);
    let mut runs = Vec::with_capacity(config.path_png.len());
    for (r, prefix) in config.path_png.iter().enumerate() {
        let n = count_frames(prefix, config.start_idx, config.zfill);
        if n == 0 {
            return Err(PrfError::config(format!(
                "Run {}: no stimulus frame at '{}'.",
                r + 1,
                frame_path(prefix, config.start_idx, config.zfill).display()
            )));
        }
        debug!(run = r + 1, frames = n, prefix = %prefix, "loading stimulus frames");
        let frames = (0..n)
            .map(|k| load_frame(&frame_path(prefix, config.start_idx + k, config.zfill), rx, ry))
            .collect::<Result<Vec<_>, _>>()?;
        runs.push(frames);
    }
    let stimulus = StimulusSequence::new(rx, ry, runs)?;
    info!(runs = stimulus.n_runs(), frames = stimulus.n_frames(), "stimulus loaded");
    Ok(stimulus)
}
