//! Result assembly: per-voxel fits back into volumes.

pub mod format;

pub use format::*;

use crate::domain::Mask;
use crate::error::PrfError;
use crate::fit::FitResult;

/// Value stored at voxels outside the mask.
pub const SENTINEL: f64 = 0.0;

/// One output parameter map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    XPos,
    YPos,
    Sd,
    /// Parameter estimate (amplitude).
    Pe,
    R2,
    PolarAngle,
    Eccentricity,
}

impl MapKind {
    pub const ALL: [MapKind; 7] = [
        MapKind::XPos,
        MapKind::YPos,
        MapKind::Sd,
        MapKind::Pe,
        MapKind::R2,
        MapKind::PolarAngle,
        MapKind::Eccentricity,
    ];

    /// File-name suffix appended to the output basename.
    pub fn suffix(self) -> &'static str {
        match self {
            MapKind::XPos => "_x_pos",
            MapKind::YPos => "_y_pos",
            MapKind::Sd => "_SD",
            MapKind::Pe => "_PE",
            MapKind::R2 => "_R2",
            MapKind::PolarAngle => "_polar_angle",
            MapKind::Eccentricity => "_eccentricity",
        }
    }

    fn value(self, r: &FitResult) -> f64 {
        match self {
            MapKind::XPos => r.x,
            MapKind::YPos => r.y,
            MapKind::Sd => r.sigma,
            MapKind::Pe => r.amplitude,
            MapKind::R2 => r.r2,
            MapKind::PolarAngle => r.y.atan2(r.x),
            MapKind::Eccentricity => r.x.hypot(r.y),
        }
    }
}

/// Full-volume parameter maps in storage order.
#[derive(Debug, Clone, PartialEq)]
pub struct PrfMaps {
    dims: [usize; 3],
    maps: Vec<(MapKind, Vec<f64>)>,
}

impl PrfMaps {
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn get(&self, kind: MapKind) -> &[f64] {
        self.maps
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (MapKind, &[f64])> {
        self.maps.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

/// Scatter results (canonical voxel order) into volumes shaped like `mask`.
pub fn assemble(mask: &Mask, results: &[FitResult]) -> Result<PrfMaps, PrfError> {
    if results.len() != mask.n_selected() {
        return Err(PrfError::shape(format!(
            "{} fit results for {} mask voxels.",
            results.len(),
            mask.n_selected()
        )));
    }
    let maps = MapKind::ALL
        .iter()
        .map(|&kind| {
            let mut values = vec![SENTINEL; mask.n_total()];
            for (&flat, r) in mask.indices().iter().zip(results) {
                values[flat] = kind.value(r);
            }
            (kind, values)
        })
        .collect();
    Ok(PrfMaps {
        dims: mask.dims(),
        maps,
    })
}
