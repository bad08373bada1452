//! Spectral analysis of frames
//!
//! [`SpectralAnalyzer`] is the seam the runtime composes with; [`FftAnalyzer`]
//! is the stock implementation. Per frame the chain is:
//!
//! 1. optional min-max normalization of the raw signal to `[0, scale]`
//! 2. optional low/high/band-pass filter
//! 3. window function
//! 4. FFT → `ln(1 + |X|²/N)` per bin
//! 5. optional min-max normalization over a frequency sub-range
//! 6. optional absolute values

use crate::filters::FilterCache;
use crate::frame::Frame;
use crate::spectrum::Spectrum;
use crate::window;
use num_complex::Complex;
use parking_lot::{Mutex, RwLock};
use rustfft::FftPlanner;
use spectra_core::{DspConfig, PowerSnapshot, SpectraError, SpectraResult};
use tracing::{debug, trace};

/// Step used when no reference frequencies are configured
const NORMALIZATION_STEP_HZ: f64 = 0.1;

/// Spectrum and power queries over a [`Frame`]
pub trait SpectralAnalyzer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Memoized log power spectrum of `frame`
    fn spectrum<'a>(&self, frame: &'a Frame) -> SpectraResult<&'a Spectrum>;

    /// Power at `frequency`, in `(0, nyquist]`
    fn power_at(&self, frame: &Frame, frequency: f64) -> SpectraResult<f64>;

    /// Tent-weighted power over `[from, to]`
    fn band_power(&self, frame: &Frame, from: f64, to: f64) -> SpectraResult<f64>;

    /// Pick up a new configuration; applies to frames analysed afterwards
    fn reconfigure(&self, _config: &DspConfig) -> SpectraResult<()> {
        Ok(())
    }
}

/// Radix-2 FFT analyzer driven by [`DspConfig`]
pub struct FftAnalyzer {
    config: RwLock<DspConfig>,
    planner: Mutex<FftPlanner<f64>>,
    filters: FilterCache,
}

impl std::fmt::Debug for FftAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftAnalyzer")
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}

impl FftAnalyzer {
    pub fn new(config: &DspConfig) -> Self {
        Self {
            config: RwLock::new(config.clone()),
            planner: Mutex::new(FftPlanner::new()),
            filters: FilterCache::new(),
        }
    }

    fn compute(&self, values: &[f64], sample_rate: f64) -> SpectraResult<Spectrum> {
        let config = self.config.read().clone();
        let n = values.len();
        if n < 2 || !n.is_power_of_two() {
            return Err(SpectraError::InvalidConfig {
                reason: format!("frame length {} is not a power of two", n),
            });
        }

        let mut data = values.to_vec();
        if config.normalize_signal() {
            normalize_min_max(&mut data, config.signal_scale());
        }

        let chain = self.filters.chain_for(&config)?;
        chain.process(&mut data);
        window::apply(config.window_function(), &mut data);

        let fft = self.planner.lock().plan_fft_forward(n);
        let mut buffer: Vec<Complex<f64>> = data.iter().map(|&x| Complex::new(x, 0.0)).collect();
        fft.process(&mut buffer);

        let mut log_power: Vec<f64> = buffer[..=n / 2]
            .iter()
            .map(|c| (c.norm_sqr() / n as f64).ln_1p())
            .collect();

        if config.normalize_fft() {
            let (low, high) = config.normalize_fft_range();
            let bin_width = sample_rate / n as f64;
            normalize_sub_range(&mut log_power, bin_width, low, high);
        }
        if config.absolute_values() {
            log_power.iter_mut().for_each(|p| *p = p.abs());
        }

        trace!(fft_size = n, sample_rate, "spectrum computed");
        Ok(Spectrum::from_log_power(log_power, sample_rate, n))
    }

    /// `1 / max_power` over the reference set or a 0.1 Hz grid
    fn normalization_scale(&self, config: &DspConfig, spectrum: &Spectrum) -> SpectraResult<f64> {
        let nyquist = spectrum.nyquist();
        let max_power = if config.reference_frequencies().is_empty() {
            let steps = (nyquist / NORMALIZATION_STEP_HZ).floor() as usize;
            (1..=steps)
                .map(|i| spectrum.power_at(i as f64 * NORMALIZATION_STEP_HZ))
                .filter_map(Result::ok)
                .fold(f64::NEG_INFINITY, f64::max)
        } else {
            config
                .reference_frequencies()
                .iter()
                .map(|&f| spectrum.power_at(f))
                .collect::<SpectraResult<Vec<f64>>>()?
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max)
        };

        if max_power.is_finite() && max_power > 0.0 {
            Ok(1.0 / max_power)
        } else {
            debug!(max_power, "no positive reference power, normalization disabled for frame");
            Ok(1.0)
        }
    }

    fn scale_for(&self, frame: &Frame, spectrum: &Spectrum) -> SpectraResult<f64> {
        let config = self.config.read().clone();
        if !config.normalize_power() {
            return Ok(1.0);
        }
        frame.normalization_or_init(|| self.normalization_scale(&config, spectrum))
    }
}

impl SpectralAnalyzer for FftAnalyzer {
    fn name(&self) -> &str {
        "fft"
    }

    fn spectrum<'a>(&self, frame: &'a Frame) -> SpectraResult<&'a Spectrum> {
        frame.spectrum_or_init(|values, rate| self.compute(values, rate))
    }

    fn power_at(&self, frame: &Frame, frequency: f64) -> SpectraResult<f64> {
        let spectrum = self.spectrum(frame)?;
        let power = spectrum.power_at(frequency)?;
        Ok(power * self.scale_for(frame, spectrum)?)
    }

    fn band_power(&self, frame: &Frame, from: f64, to: f64) -> SpectraResult<f64> {
        let spectrum = self.spectrum(frame)?;
        let power = spectrum.band_power(from, to)?;
        Ok(power * self.scale_for(frame, spectrum)?)
    }

    fn reconfigure(&self, config: &DspConfig) -> SpectraResult<()> {
        config.validate()?;
        *self.config.write() = config.clone();
        Ok(())
    }
}

/// Raw per-cycle snapshot: every configured frequency and band of `frame`
pub fn snapshot_for_frame(
    analyzer: &dyn SpectralAnalyzer,
    frame: &Frame,
    config: &DspConfig,
) -> SpectraResult<PowerSnapshot> {
    let mut builder = PowerSnapshot::builder(frame.capture_time_nanos(), config.sample_rate());
    for &frequency in config.frequencies() {
        builder = builder.frequency(frequency, analyzer.power_at(frame, frequency)?)?;
    }
    for band in config.bands() {
        builder = builder.band(band.from, band.to, analyzer.band_power(frame, band.from, band.to)?)?;
    }
    Ok(builder.build())
}

/// Map `data` linearly onto `[0, scale]`; a flat signal becomes all zeros
pub fn normalize_min_max(data: &mut [f64], scale: f64) {
    let (min, max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        data.iter_mut().for_each(|x| *x = 0.0);
        return;
    }
    data.iter_mut().for_each(|x| *x = (*x - min) / range * scale);
}

/// Rescale every bin so the bins inside `[low, high]` Hz span `[0, 1]`
fn normalize_sub_range(bins: &mut [f64], bin_width: f64, low: f64, high: f64) {
    if bins.is_empty() {
        return;
    }
    let first = (low / bin_width).ceil() as usize;
    let last = ((high / bin_width).floor() as usize).min(bins.len() - 1);
    if first > last {
        return;
    }
    let (min, max) = bins[first..=last]
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let range = max - min;
    if range > 0.0 {
        bins.iter_mut().for_each(|p| *p = (*p - min) / range);
    }
}
