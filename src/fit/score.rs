//! Per-voxel scoring against the model bank.
//!
//! For a centred candidate time course `x` and a centred voxel time course `y`:
//!
//! ```text
//! R²        = (x·y)² / (‖x‖² ‖y‖²)
//! amplitude = (x·y) / ‖x‖²            (slope of the least-squares fit with intercept)
//! ```
//!
//! Selection keeps the first candidate with a strictly greater R², so ties
//! resolve to the lowest canonical grid index. Every backend funnels its final
//! decision through [`ScoredBank::best_of`], which is what makes their
//! candidate choices identical.
//!
//! Zero-variance inputs have no defined correlation:
//! - a zero-variance candidate scores `R² = 0`
//! - a zero-variance voxel gets candidate 0 with `R² = 0` and `amplitude = 0`

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::grid::VisualSpaceGrid;
use crate::math::is_zero_variance;
use crate::models::ModelBank;

/// Best-fitting candidate for one voxel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Canonical grid index of the winning candidate.
    pub candidate: usize,
    pub x: f64,
    pub y: f64,
    pub sigma: f64,
    pub amplitude: f64,
    /// Goodness of fit (squared Pearson correlation).
    pub r2: f64,
}

/// Results for a contiguous block of voxels.
#[derive(Debug, Clone, Default)]
pub struct BlockFit {
    pub results: Vec<FitResult>,
    /// Voxels whose time course had zero variance.
    pub degenerate: usize,
}

impl BlockFit {
    pub fn merge(parts: Vec<BlockFit>) -> BlockFit {
        let mut out = BlockFit {
            results: Vec::with_capacity(parts.iter().map(|p| p.results.len()).sum()),
            degenerate: 0,
        };
        for part in parts {
            out.results.extend(part.results);
            out.degenerate += part.degenerate;
        }
        out
    }
}

/// A voxel time course after centring.
#[derive(Debug, Clone)]
pub struct CenteredSeries {
    pub values: Vec<f64>,
    pub ss: f64,
}

impl CenteredSeries {
    /// Centre `y`; `None` when it has zero variance.
    pub fn new(y: &[f64]) -> Option<Self> {
        let (values, ss, mean) = center(y);
        if is_zero_variance(ss, y.len(), mean) { None } else { Some(Self { values, ss }) }
    }
}

fn center(y: &[f64]) -> (Vec<f64>, f64, f64) {
    if y.is_empty() {
        return (Vec::new(), 0.0, 0.0);
    }
    let mean = y.iter().sum::<f64>() / y.len() as f64;
    let values: Vec<f64> = y.iter().map(|v| v - mean).collect();
    let ss = values.iter().map(|v| v * v).sum();
    (values, ss, mean)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Model bank with centred rows and their sums of squares, shared read-only by workers.
#[derive(Debug, Clone)]
pub struct ScoredBank<'a> {
    bank: &'a ModelBank,
    rows: Vec<Vec<f64>>,
    /// Zero for zero-variance candidates.
    ss: Vec<f64>,
}

impl<'a> ScoredBank<'a> {
    pub fn new(bank: &'a ModelBank) -> Self {
        let mut rows = Vec::with_capacity(bank.n_candidates());
        let mut ss = Vec::with_capacity(bank.n_candidates());
        for row in bank.values().row_iter() {
            let tc: Vec<f64> = row.iter().copied().collect();
            let (values, s, mean) = center(&tc);
            ss.push(if is_zero_variance(s, tc.len(), mean) { 0.0 } else { s });
            rows.push(values);
        }
        Self { bank, rows, ss }
    }

    pub fn grid(&self) -> &VisualSpaceGrid {
        self.bank.grid()
    }

    pub fn n_candidates(&self) -> usize {
        self.rows.len()
    }

    pub fn n_volumes(&self) -> usize {
        self.bank.n_volumes()
    }

    pub fn centered_rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn sum_squares(&self) -> &[f64] {
        &self.ss
    }

    /// Exact `(R², amplitude)` of one candidate against a centred voxel.
    pub fn score(&self, candidate: usize, y: &CenteredSeries) -> (f64, f64) {
        let ssx = self.ss[candidate];
        if ssx == 0.0 {
            return (0.0, 0.0);
        }
        let d = dot(&self.rows[candidate], &y.values);
        (d * d / (ssx * y.ss), d / ssx)
    }

    /// Best candidate among `candidates` (visited in ascending index order).
    pub fn best_of(&self, y: &CenteredSeries, candidates: impl IntoIterator<Item = usize>) -> FitResult {
        let mut best = (0usize, f64::NEG_INFINITY, 0.0);
        for c in candidates {
            let (r2, amp) = self.score(c, y);
            if r2 > best.1 {
                best = (c, r2, amp);
            }
        }
        if best.1 == f64::NEG_INFINITY {
            return self.degenerate_result();
        }
        self.result(best.0, best.1, best.2)
    }

    /// Exhaustive search over the whole bank.
    pub fn fit_series(&self, y: &[f64]) -> (FitResult, bool) {
        match CenteredSeries::new(y) {
            Some(centered) => (self.best_of(&centered, 0..self.n_candidates()), false),
            None => (self.degenerate_result(), true),
        }
    }

    /// Fit every row (voxel) of a `voxels × volumes` block.
    pub fn fit_block(&self, block: &DMatrix<f64>) -> BlockFit {
        let mut out = BlockFit {
            results: Vec::with_capacity(block.nrows()),
            degenerate: 0,
        };
        let mut buf = vec![0.0; block.ncols()];
        for row in block.row_iter() {
            for (b, v) in buf.iter_mut().zip(row.iter()) {
                *b = *v;
            }
            let (res, degenerate) = self.fit_series(&buf);
            out.results.push(res);
            out.degenerate += usize::from(degenerate);
        }
        out
    }

    /// Result reported for zero-variance voxels: first grid candidate, no fit.
    pub fn degenerate_result(&self) -> FitResult {
        self.result(0, 0.0, 0.0)
    }

    fn result(&self, candidate: usize, r2: f64, amplitude: f64) -> FitResult {
        let c = self.grid().candidate(candidate);
        FitResult {
            candidate,
            x: c.x,
            y: c.y,
            sigma: c.sigma,
            amplitude,
            r2,
        }
    }
}
