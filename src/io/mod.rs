//! File formats and data access.
//!
//! - uncompressed NIfTI-1 volumes (`nifti`)
//! - PNG stimulus frame sequences (`stimulus`)
//! - memory-mapped matrix stores (`store`) behind the functional data
//!   sources (`source`) and the model bank cache (`cache`)
//! - parameter map and CSV outputs (`export`)

pub mod cache;
pub mod export;
pub mod nifti;
pub mod source;
pub mod stimulus;
pub mod store;

pub use cache::*;
pub use export::*;
pub use source::*;
pub use stimulus::*;
