//! Shared domain types.

use crate::error::PrfError;

/// Boolean volume selecting the voxels that take part in the analysis.
///
/// The canonical voxel order used by functional data and fit results is the
/// volume storage order (x fastest, then y, then z) restricted to selected
/// voxels. `indices()` lists the flat storage index of each selected voxel in
/// that order.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    dims: [usize; 3],
    values: Vec<bool>,
    indices: Vec<usize>,
}

impl Mask {
    pub fn new(dims: [usize; 3], values: Vec<bool>) -> Result<Self, PrfError> {
        let total = dims[0] * dims[1] * dims[2];
        if values.len() != total {
            return Err(PrfError::shape(format!(
                "Mask has {} values but dims {:?} need {total}.",
                values.len(),
                dims
            )));
        }
        let indices = values
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| v.then_some(i))
            .collect();
        Ok(Self {
            dims,
            values,
            indices,
        })
    }

    /// Select voxels whose value is strictly positive.
    pub fn from_values(dims: [usize; 3], data: &[f64]) -> Result<Self, PrfError> {
        Self::new(dims, data.iter().map(|&v| v > 0.0).collect())
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Number of voxels in the full volume.
    pub fn n_total(&self) -> usize {
        self.values.len()
    }

    /// Number of selected voxels.
    pub fn n_selected(&self) -> usize {
        self.indices.len()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn is_selected(&self, flat_index: usize) -> bool {
        self.values.get(flat_index).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_storage_order() {
        let dims = [2, 2, 1];
        let mask = Mask::from_values(dims, &[0.0, 1.0, 2.0, -1.0]).unwrap();
        assert_eq!(mask.indices(), &[1, 2]);
        assert_eq!(mask.n_selected(), 2);
        assert_eq!(mask.n_total(), 4);
        assert!(mask.is_selected(2));
        assert!(!mask.is_selected(3));
        assert!(!mask.is_selected(99));
    }

    #[test]
    fn wrong_length_is_a_shape_mismatch() {
        let err = Mask::new([2, 2, 2], vec![true; 7]).unwrap_err();
        assert!(matches!(err, PrfError::ShapeMismatch(_)));
    }

    #[test]
    fn empty_mask_is_valid() {
        let mask = Mask::new([3, 1, 1], vec![false; 3]).unwrap();
        assert_eq!(mask.n_selected(), 0);
    }
}
