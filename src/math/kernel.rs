//! 1D Gaussian smoothing and causal convolution.
//!
//! Smoothing follows the usual image-processing conventions:
//! - the kernel is truncated at 4 SD and normalised to unit sum
//! - samples beyond the edges repeat the nearest edge sample
//!
//! The same routine drives temporal smoothing (model time courses and
//! functional data) and each axis of the separable spatial filter.

/// Kernel truncation, in standard deviations.
const TRUNCATE: f64 = 4.0;

/// Normalised Gaussian kernel of radius `round(4σ)`.
///
/// Returns `[1.0]` for a non-positive or non-finite `sigma`.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return vec![1.0];
    }
    let radius = (TRUNCATE * sigma + 0.5).floor() as isize;
    let denom = 2.0 * sigma * sigma;
    let mut weights: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / denom).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Smooth `input` with `kernel`, writing into `out` (edge-nearest boundary).
///
/// # Panics
/// Panics if `out.len() != input.len()` or `kernel` has even length.
pub fn smooth_into(input: &[f64], kernel: &[f64], out: &mut [f64]) {
    assert_eq!(input.len(), out.len());
    assert!(kernel.len() % 2 == 1, "kernel length must be odd");
    let n = input.len() as isize;
    if n == 0 {
        return;
    }
    let radius = (kernel.len() / 2) as isize;
    for (i, o) in out.iter_mut().enumerate() {
        let i = i as isize;
        let mut acc = 0.0;
        for (k, &w) in kernel.iter().enumerate() {
            let j = (i + k as isize - radius).clamp(0, n - 1);
            acc += w * input[j as usize];
        }
        *o = acc;
    }
}

/// Smooth a series in place.
pub fn smooth_in_place(series: &mut [f64], kernel: &[f64]) {
    if kernel.len() <= 1 {
        return;
    }
    let input = series.to_vec();
    smooth_into(&input, kernel, series);
}

/// Causal convolution truncated to the input length: `out[n] = Σ_k h[k]·x[n-k]`.
pub fn convolve_causal(x: &[f64], h: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; x.len()];
    for (n, o) in out.iter_mut().enumerate() {
        let kmax = h.len().min(n + 1);
        let mut acc = 0.0;
        for k in 0..kmax {
            acc += h[k] * x[n - k];
        }
        *o = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalised_and_symmetric() {
        let k = gaussian_kernel(1.5);
        assert_eq!(k.len(), 2 * 6 + 1);
        let sum: f64 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        for i in 0..k.len() / 2 {
            assert!((k[i] - k[k.len() - 1 - i]).abs() < 1e-15);
        }
    }

    #[test]
    fn zero_sigma_is_identity() {
        let mut v = vec![1.0, 5.0, -2.0];
        smooth_in_place(&mut v, &gaussian_kernel(0.0));
        assert_eq!(v, vec![1.0, 5.0, -2.0]);
    }

    #[test]
    fn smoothing_preserves_constants_at_edges() {
        let mut v = vec![3.0; 10];
        smooth_in_place(&mut v, &gaussian_kernel(2.0));
        for x in v {
            assert!((x - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn causal_convolution_delays_an_impulse() {
        let x = [0.0, 1.0, 0.0, 0.0];
        let h = [0.5, 0.25];
        assert_eq!(convolve_causal(&x, &h), vec![0.0, 0.5, 0.25, 0.0]);
    }
}
