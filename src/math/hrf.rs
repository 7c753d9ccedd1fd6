//! Canonical double-gamma haemodynamic response function.
//!
//! `h(t) = g(t; a1, b) - c · g(t; a2, b)`, where `g` is the gamma density with
//! shape `a` and scale `b`. Defaults are the common canonical values (peak
//! shape 6, undershoot shape 16, ratio 1/6, unit scale, 32 s support).
//!
//! The sampled kernel is normalised to unit sum so that a sustained unit
//! response converges to 1 after convolution.

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrfParams {
    pub peak_shape: f64,
    pub undershoot_shape: f64,
    pub undershoot_ratio: f64,
    pub scale: f64,
    /// Kernel support in seconds.
    pub length_s: f64,
}

impl Default for HrfParams {
    fn default() -> Self {
        Self {
            peak_shape: 6.0,
            undershoot_shape: 16.0,
            undershoot_ratio: 1.0 / 6.0,
            scale: 1.0,
            length_s: 32.0,
        }
    }
}

/// Sample the HRF at `t = 0, TR, 2·TR, ...` over the kernel support.
pub fn sample_hrf(params: &HrfParams, tr: f64) -> Vec<f64> {
    let n = ((params.length_s / tr).ceil() as usize).max(1) + 1;
    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 * tr;
            gamma_pdf(t, params.peak_shape, params.scale)
                - params.undershoot_ratio * gamma_pdf(t, params.undershoot_shape, params.scale)
        })
        .collect();
    let sum: f64 = h.iter().sum();
    if sum.abs() > f64::EPSILON {
        for v in &mut h {
            *v /= sum;
        }
    }
    h
}

fn gamma_pdf(t: f64, shape: f64, scale: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    let ln = (shape - 1.0) * t.ln() - t / scale - ln_gamma(shape) - shape * scale.ln();
    ln.exp()
}
