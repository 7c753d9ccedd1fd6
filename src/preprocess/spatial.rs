//! Separable 3D Gaussian smoothing of volumes.

use rayon::prelude::*;

use crate::io::nifti::Volume;
use crate::math::{gaussian_kernel, smooth_into};

/// Smooth every frame of `volume` along x, y and z with SD `sd_voxels`.
pub fn smooth_volume(volume: &mut Volume, sd_voxels: f64) {
    let kernel = gaussian_kernel(sd_voxels);
    if kernel.len() <= 1 {
        return;
    }
    let dims = volume.dims;
    let n = volume.n_voxels();
    if n == 0 {
        return;
    }
    volume
        .data
        .par_chunks_mut(n)
        .for_each(|frame| smooth_frame(frame, dims, &kernel));
}

/// Smooth one 3D frame in storage order (x fastest).
pub fn smooth_frame(frame: &mut [f64], dims: [usize; 3], kernel: &[f64]) {
    let [nx, ny, nz] = dims;
    let strides = [1, nx, nx * ny];
    for axis in 0..3 {
        let len = dims[axis];
        if len < 2 {
            continue;
        }
        let stride = strides[axis];
        let mut line = vec![0.0; len];
        let mut out = vec![0.0; len];
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let pos = [x, y, z];
                    if pos[axis] != 0 {
                        continue;
                    }
                    let base = x + nx * (y + ny * z);
                    for (i, l) in line.iter_mut().enumerate() {
                        *l = frame[base + i * stride];
                    }
                    smooth_into(&line, kernel, &mut out);
                    for (i, o) in out.iter().enumerate() {
                        frame[base + i * stride] = *o;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::nifti::Geometry;

    #[test]
    fn smoothing_spreads_a_point_and_keeps_total() {
        let dims = [7, 7, 7];
        let mut data = vec![0.0; 343];
        data[3 + 7 * (3 + 7 * 3)] = 1.0;
        let mut vol = Volume::new(dims, 1, data, Geometry::default()).unwrap();
        smooth_volume(&mut vol, 0.8);

        let total: f64 = vol.data.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        let centre = vol.data[3 + 7 * (3 + 7 * 3)];
        assert!(centre < 1.0 && centre > 0.0);
        // Symmetric along each axis.
        let at = |x: usize, y: usize, z: usize| vol.data[x + 7 * (y + 7 * z)];
        assert!((at(2, 3, 3) - at(4, 3, 3)).abs() < 1e-15);
        assert!((at(3, 2, 3) - at(3, 3, 4)).abs() < 1e-15);
    }

    #[test]
    fn constant_volume_is_unchanged() {
        let mut vol = Volume::new([4, 3, 2], 2, vec![2.5; 48], Geometry::default()).unwrap();
        smooth_volume(&mut vol, 1.5);
        assert!(vol.data.iter().all(|v| (v - 2.5).abs() < 1e-12));
    }
}
