//! pRF model time courses.
//!
//! - stimulus frames as binary visual-field rasters (`stimulus`)
//! - Gaussian pRF overlap with each frame (`prf`)
//! - the model bank: HRF convolution, temporal smoothing, cache key (`bank`)

pub mod bank;
pub mod prf;
pub mod stimulus;

pub use bank::*;
pub use prf::*;
pub use stimulus::*;
