//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the run configuration (`PrfConfig`) and backend selection (`BackendKind`)
//! - the analysis mask and its canonical voxel ordering (`Mask`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
