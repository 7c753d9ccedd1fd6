//! Formatted terminal output for a fitting run.

use crate::fit::FitResult;

/// Aggregate goodness-of-fit over all fitted voxels.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSummary {
    pub voxels: usize,
    pub mean_r2: f64,
    pub median_r2: f64,
    /// Voxels with R² of at least 0.1.
    pub above_0_1: usize,
}

impl FitSummary {
    pub fn from_results(results: &[FitResult]) -> Self {
        if results.is_empty() {
            return Self {
                voxels: 0,
                mean_r2: 0.0,
                median_r2: 0.0,
                above_0_1: 0,
            };
        }
        let mut r2: Vec<f64> = results.iter().map(|r| r.r2).collect();
        r2.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = r2.len();
        let median_r2 = if n % 2 == 1 { r2[n / 2] } else { 0.5 * (r2[n / 2 - 1] + r2[n / 2]) };
        Self {
            voxels: n,
            mean_r2: r2.iter().sum::<f64>() / n as f64,
            median_r2,
            above_0_1: r2.iter().filter(|&&v| v >= 0.1).count(),
        }
    }
}

/// Format the run summary (backend, grid size, fit quality, best voxels).
pub fn format_run_summary(backend: &str, candidates: usize, results: &[FitResult], top_n: usize) -> String {
    let summary = FitSummary::from_results(results);
    let mut out = String::new();

    out.push_str("=== prf - population receptive field fit ===\n");
    out.push_str(&format!("Backend: {backend}\n"));
    out.push_str(&format!("Candidates: {candidates}\n"));
    out.push_str(&format!(
        "Voxels: n={} | R2 mean={:.4} median={:.4} | R2>=0.1: {}\n",
        summary.voxels, summary.mean_r2, summary.median_r2, summary.above_0_1
    ));

    if top_n > 0 && !results.is_empty() {
        out.push_str("\nBest-fitting voxels:\n");
        out.push_str(&format_table(results, top_n));
    }
    out
}

fn format_table(results: &[FitResult], top_n: usize) -> String {
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| {
        results[b]
            .r2
            .partial_cmp(&results[a].r2)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = String::new();
    out.push_str(&format!(
        "{:>8} {:>9} {:>8} {:>8} {:>8} {:>10} {:>8}\n",
        "voxel", "candidate", "x", "y", "sd", "pe", "r2"
    ));
    out.push_str(&format!(
        "{:->8} {:->9} {:->8} {:->8} {:->8} {:->10} {:->8}\n",
        "", "", "", "", "", "", ""
    ));
    for &v in order.iter().take(top_n) {
        let r = &results[v];
        out.push_str(&format!(
            "{v:>8} {:>9} {:>8.3} {:>8.3} {:>8.3} {:>10.4} {:>8.4}\n",
            r.candidate, r.x, r.y, r.sigma, r.amplitude, r.r2
        ));
    }
    out
}
