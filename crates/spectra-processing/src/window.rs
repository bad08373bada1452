//! Window functions applied before the FFT

use spectra_core::WindowFunction;
use std::f64::consts::PI;

/// Symmetric window coefficients of length `n`
pub fn coefficients(window: WindowFunction, n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let x = 2.0 * PI * i as f64 / denom;
            match window {
                WindowFunction::Hamming => 0.54 - 0.46 * x.cos(),
                WindowFunction::Hann => 0.5 - 0.5 * x.cos(),
                WindowFunction::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                WindowFunction::Rectangular => 1.0,
            }
        })
        .collect()
}

/// Multiply `data` in place by the window
pub fn apply(window: WindowFunction, data: &mut [f64]) {
    if window == WindowFunction::Rectangular {
        return;
    }
    let coeffs = coefficients(window, data.len());
    for (sample, w) in data.iter_mut().zip(coeffs) {
        *sample *= w;
    }
}
