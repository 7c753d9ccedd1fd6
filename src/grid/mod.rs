//! Visual-space grid of pRF candidates.
//!
//! The fitting engine evaluates every candidate in this grid, so the grid
//! ordering doubles as the canonical candidate index used by model banks,
//! caches and fit results.

pub mod visual_space;

pub use visual_space::*;
