//! Butterworth pass filters applied to a frame before the FFT
//!
//! Cutoffs are normalized fractions of the frame rate, `(0, 0.5)`. Each frame
//! is filtered from a zeroed state since frames are independent windows.

use parking_lot::Mutex;
use spectra_core::{config_error, DspConfig, PassFilter, SpectraResult};
use std::f64::consts::{PI, SQRT_2};
use std::sync::Arc;
use tracing::debug;

/// Single 2nd-order section
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    // y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
    b0: f64, b1: f64, b2: f64,
    a1: f64, a2: f64,
}

impl Biquad {
    /// Butterworth lowpass at `fraction` of the sample rate
    pub fn lowpass(fraction: f64) -> SpectraResult<Self> {
        let (k, k2, norm) = prewarp(fraction)?;
        let b0 = k2 / norm;
        Ok(Biquad {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k2 - 1.0) / norm,
            a2: (k2 - SQRT_2 * k + 1.0) / norm,
        })
    }

    /// Butterworth highpass at `fraction` of the sample rate
    pub fn highpass(fraction: f64) -> SpectraResult<Self> {
        let (k, k2, norm) = prewarp(fraction)?;
        let b0 = 1.0 / norm;
        Ok(Biquad {
            b0,
            b1: -2.0 * b0,
            b2: b0,
            a1: 2.0 * (k2 - 1.0) / norm,
            a2: (k2 - SQRT_2 * k + 1.0) / norm,
        })
    }

    /// Filter `data` in place starting from a zeroed state
    pub fn process(&self, data: &mut [f64]) {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        for sample in data.iter_mut() {
            let input = *sample;
            let output = self.b0 * input + self.b1 * x1 + self.b2 * x2
                - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = input;
            y2 = y1;
            y1 = output;
            *sample = output;
        }
    }
}

fn prewarp(fraction: f64) -> SpectraResult<(f64, f64, f64)> {
    if !(fraction > 0.0 && fraction < 0.5) {
        return Err(config_error!("normalized cutoff {} outside (0, 0.5)", fraction));
    }
    let omega_c = 2.0 * PI * fraction;
    let k = (omega_c / 2.0).tan();
    let k2 = k * k;
    Ok((k, k2, k2 + SQRT_2 * k + 1.0))
}

/// Cascade of sections for one pass-filter mode
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    sections: Vec<Biquad>,
}

impl FilterChain {
    /// Design the chain for `mode`; `None` yields an empty chain
    pub fn design(mode: PassFilter, low_fraction: f64, high_fraction: f64) -> SpectraResult<Self> {
        let sections = match mode {
            PassFilter::None => Vec::new(),
            PassFilter::LowPass => vec![Biquad::lowpass(low_fraction)?],
            PassFilter::HighPass => vec![Biquad::highpass(high_fraction)?],
            // highpass then lowpass
            PassFilter::BandPass => vec![
                Biquad::highpass(high_fraction)?,
                Biquad::lowpass(low_fraction)?,
            ],
        };
        Ok(Self { sections })
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn process(&self, data: &mut [f64]) {
        for section in &self.sections {
            section.process(data);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FilterKey {
    mode: PassFilter,
    low_fraction: f64,
    high_fraction: f64,
}

/// Designed chain cached by the current cutoff pair
///
/// Redesigns only when the mode or one of the normalized cutoffs changes.
#[derive(Debug, Default)]
pub struct FilterCache {
    current: Mutex<Option<(FilterKey, Arc<FilterChain>)>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain for the filter settings of `config`
    pub fn chain_for(&self, config: &DspConfig) -> SpectraResult<Arc<FilterChain>> {
        let key = FilterKey {
            mode: config.pass_filter(),
            low_fraction: config.low_pass_fraction(),
            high_fraction: config.high_pass_fraction(),
        };

        let mut current = self.current.lock();
        if let Some((cached_key, chain)) = current.as_ref() {
            if *cached_key == key {
                return Ok(Arc::clone(chain));
            }
        }

        let chain = Arc::new(FilterChain::design(key.mode, key.low_fraction, key.high_fraction)?);
        debug!(
            mode = ?key.mode,
            low = key.low_fraction,
            high = key.high_fraction,
            "pass filter redesigned"
        );
        *current = Some((key, Arc::clone(&chain)));
        Ok(chain)
    }
}
