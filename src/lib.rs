//! `prf-mapper` library crate.
//!
//! Population receptive field (pRF) mapping for fMRI: every voxel's time
//! course is matched against a bank of predicted responses, one per candidate
//! Gaussian receptive field on a visual-space grid.
//!
//! The binary (`prf`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the pipeline stages can be driven individually

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod grid;
pub mod io;
pub mod math;
pub mod models;
pub mod preprocess;
pub mod report;
