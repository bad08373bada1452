//! DSP configuration shared by every stage of the pipeline
//!
//! All fields are private. Mutation goes through validated setters or
//! [`DspConfig::update`], which validates a candidate copy and commits only
//! when the whole configuration is still consistent. A rejected change leaves
//! the previous configuration untouched.

use crate::config_error;
use crate::error::{SpectraError, SpectraResult};
use serde::{Deserialize, Serialize};

/// Window applied to each frame before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    /// Hamming window (default)
    #[default]
    Hamming,
    /// Hann window
    Hann,
    /// Blackman window
    Blackman,
    /// No tapering
    Rectangular,
}

/// Pass filter applied to the signal before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassFilter {
    #[default]
    None,
    LowPass,
    HighPass,
    BandPass,
}

impl PassFilter {
    /// True when the low-pass cutoff participates
    pub fn uses_low(&self) -> bool {
        matches!(self, PassFilter::LowPass | PassFilter::BandPass)
    }

    /// True when the high-pass cutoff participates
    pub fn uses_high(&self) -> bool {
        matches!(self, PassFilter::HighPass | PassFilter::BandPass)
    }
}

/// Where delivered samples are kept until the next frame is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    /// Insertion-ordered circular buffer, one row per delivery
    Circular,
    /// Sorted map keyed by capture timestamp
    #[default]
    TimeKeyed,
}

/// How per-cycle snapshots are combined over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Smoothing {
    /// `sqrt(Σ rank·p² / Σ rank)` per key
    #[default]
    RecencyRms,
    /// `Σ(w·v) / (N(N+1)/2)` per key
    WeightedMovingAverage,
}

/// Named frequency band reported on every snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub name: String,
    pub from: f64,
    pub to: f64,
}

impl FrequencyBand {
    pub fn new(name: impl Into<String>, from: f64, to: f64) -> Self {
        Self { name: name.into(), from, to }
    }

    /// Classic EEG rhythm bands
    pub fn eeg_presets() -> Vec<FrequencyBand> {
        vec![
            FrequencyBand::new("delta", 1.0, 4.0),
            FrequencyBand::new("theta", 4.0, 8.0),
            FrequencyBand::new("alpha", 8.0, 13.0),
            FrequencyBand::new("beta", 13.0, 30.0),
            FrequencyBand::new("gamma", 30.0, 45.0),
        ]
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    sample_rate: f64,
    sample_size: usize,
    cycles_per_second: f64,
    samples_per_cycle: Option<usize>,
    window_function: WindowFunction,
    pass_filter: PassFilter,
    low_pass_frequency: f64,
    high_pass_frequency: f64,
    low_pass_factor: f64,
    high_pass_factor: f64,
    normalize_signal: bool,
    signal_scale: f64,
    normalize_fft: bool,
    normalize_fft_low: f64,
    normalize_fft_high: f64,
    absolute_values: bool,
    normalize_power: bool,
    reference_frequencies: Vec<f64>,
    baseline: bool,
    baseline_value: f64,
    channel_index: usize,
    num_channels: usize,
    buffer_mode: BufferMode,
    frequencies: Vec<f64>,
    bands: Vec<FrequencyBand>,
    smoothing: Smoothing,
    smoothing_window: usize,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            sample_rate: 256.0,
            sample_size: 256,
            cycles_per_second: 10.0,
            samples_per_cycle: None,
            window_function: WindowFunction::Hamming,
            pass_filter: PassFilter::None,
            low_pass_frequency: 4.0,
            high_pass_frequency: 1.0,
            low_pass_factor: 25.0,
            high_pass_factor: 20.0,
            normalize_signal: false,
            signal_scale: 1.0,
            normalize_fft: false,
            normalize_fft_low: 1.0,
            normalize_fft_high: 45.0,
            absolute_values: false,
            normalize_power: false,
            reference_frequencies: Vec::new(),
            baseline: false,
            baseline_value: 0.0,
            channel_index: 0,
            num_channels: 1,
            buffer_mode: BufferMode::TimeKeyed,
            frequencies: vec![10.0],
            bands: FrequencyBand::eeg_presets(),
            smoothing: Smoothing::RecencyRms,
            smoothing_window: 4,
        }
    }
}

/// Generates a validated setter that commits only when the result is valid
macro_rules! validated_setter {
    ($(#[$doc:meta])* $name:ident, $field:ident: $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&mut self, value: $ty) -> SpectraResult<()> {
            self.update(|c| c.$field = value)
        }
    };
}

impl DspConfig {
    /// Default configuration with a different rate and FFT size
    pub fn new(sample_rate: f64, sample_size: usize) -> SpectraResult<Self> {
        let config = Self {
            sample_rate,
            sample_size,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `change` to a copy, validate it, then commit
    pub fn update<F>(&mut self, change: F) -> SpectraResult<()>
    where
        F: FnOnce(&mut DspConfig),
    {
        let mut candidate = self.clone();
        change(&mut candidate);
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Check every invariant of the configuration
    pub fn validate(&self) -> SpectraResult<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(config_error!("sample rate must be positive, got {}", self.sample_rate));
        }
        if self.sample_size < 4 || !self.sample_size.is_power_of_two() {
            return Err(config_error!(
                "sample size must be a power of two >= 4, got {}",
                self.sample_size
            ));
        }
        if !self.cycles_per_second.is_finite() || self.cycles_per_second <= 0.0 {
            return Err(config_error!(
                "cycles per second must be positive, got {}",
                self.cycles_per_second
            ));
        }
        if self.samples_per_cycle == Some(0) {
            return Err(config_error!("samples per cycle must be positive"));
        }
        if self.num_channels == 0 {
            return Err(config_error!("number of channels must be positive"));
        }
        if self.channel_index >= self.num_channels {
            return Err(config_error!(
                "channel index {} out of range for {} channels",
                self.channel_index,
                self.num_channels
            ));
        }
        if self.smoothing_window == 0 {
            return Err(config_error!("smoothing window must be positive"));
        }
        if !self.signal_scale.is_finite() || self.signal_scale <= 0.0 {
            return Err(config_error!("signal scale must be positive, got {}", self.signal_scale));
        }
        if !self.baseline_value.is_finite() || self.baseline_value < 0.0 {
            return Err(config_error!(
                "baseline value must be non-negative, got {}",
                self.baseline_value
            ));
        }
        self.validate_filter()?;
        self.validate_outputs()?;

        if self.normalize_fft
            && !(self.normalize_fft_low >= 0.0 && self.normalize_fft_low < self.normalize_fft_high)
        {
            return Err(config_error!(
                "FFT normalization range [{}, {}] is empty",
                self.normalize_fft_low,
                self.normalize_fft_high
            ));
        }
        Ok(())
    }

    fn validate_filter(&self) -> SpectraResult<()> {
        for (label, factor) in [("low", self.low_pass_factor), ("high", self.high_pass_factor)] {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(config_error!("{} pass factor must be positive, got {}", label, factor));
            }
        }
        if self.pass_filter.uses_low() {
            check_fraction("low", self.low_pass_frequency, self.low_pass_fraction())?;
        }
        if self.pass_filter.uses_high() {
            check_fraction("high", self.high_pass_frequency, self.high_pass_fraction())?;
        }
        if self.pass_filter == PassFilter::BandPass
            && self.high_pass_frequency >= self.low_pass_frequency
        {
            return Err(config_error!(
                "band pass needs high pass {}Hz below low pass {}Hz",
                self.high_pass_frequency,
                self.low_pass_frequency
            ));
        }
        Ok(())
    }

    fn validate_outputs(&self) -> SpectraResult<()> {
        let nyquist = self.nyquist();
        let in_range = |f: f64| f.is_finite() && f > 0.0 && f <= nyquist;

        if let Some(&f) = self.frequencies.iter().find(|&&f| !in_range(f)) {
            return Err(SpectraError::FrequencyOutOfRange { frequency: f, nyquist });
        }
        if let Some(&f) = self.reference_frequencies.iter().find(|&&f| !in_range(f)) {
            return Err(SpectraError::FrequencyOutOfRange { frequency: f, nyquist });
        }
        for band in &self.bands {
            if !(band.from > 0.0 && band.from <= band.to && band.to < nyquist) {
                return Err(SpectraError::InvalidBand {
                    from: band.from,
                    to: band.to,
                    nyquist,
                });
            }
        }
        Ok(())
    }

    /// Highest frequency that may be queried
    ///
    /// Frames are analysed at `sample_size` points per second, so the bound is
    /// the lower of the device and analysis Nyquist frequencies.
    pub fn nyquist(&self) -> f64 {
        self.sample_rate.min(self.analysis_rate()) / 2.0
    }

    /// Rate of the frames handed to the analyzer
    pub fn analysis_rate(&self) -> f64 {
        self.sample_size as f64
    }

    /// Normalized low-pass cutoff, `cutoff / (sample_rate / factor)`
    pub fn low_pass_fraction(&self) -> f64 {
        self.low_pass_frequency / (self.sample_rate / self.low_pass_factor)
    }

    /// Normalized high-pass cutoff, `cutoff / (sample_rate / factor)`
    pub fn high_pass_fraction(&self) -> f64 {
        self.high_pass_frequency / (self.sample_rate / self.high_pass_factor)
    }

    /// Scheduler period derived from `cycles_per_second`
    pub fn cycle_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.cycles_per_second)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> SpectraResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> SpectraResult<Self> {
        let config: DspConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn sample_rate(&self) -> f64 { self.sample_rate }
    pub fn sample_size(&self) -> usize { self.sample_size }
    pub fn cycles_per_second(&self) -> f64 { self.cycles_per_second }
    pub fn samples_per_cycle(&self) -> Option<usize> { self.samples_per_cycle }
    pub fn window_function(&self) -> WindowFunction { self.window_function }
    pub fn pass_filter(&self) -> PassFilter { self.pass_filter }
    pub fn low_pass_frequency(&self) -> f64 { self.low_pass_frequency }
    pub fn high_pass_frequency(&self) -> f64 { self.high_pass_frequency }
    pub fn low_pass_factor(&self) -> f64 { self.low_pass_factor }
    pub fn high_pass_factor(&self) -> f64 { self.high_pass_factor }
    pub fn normalize_signal(&self) -> bool { self.normalize_signal }
    pub fn signal_scale(&self) -> f64 { self.signal_scale }
    pub fn normalize_fft(&self) -> bool { self.normalize_fft }
    pub fn normalize_fft_range(&self) -> (f64, f64) { (self.normalize_fft_low, self.normalize_fft_high) }
    pub fn absolute_values(&self) -> bool { self.absolute_values }
    pub fn normalize_power(&self) -> bool { self.normalize_power }
    pub fn reference_frequencies(&self) -> &[f64] { &self.reference_frequencies }
    pub fn baseline(&self) -> bool { self.baseline }
    pub fn baseline_value(&self) -> f64 { self.baseline_value }
    pub fn channel_index(&self) -> usize { self.channel_index }
    pub fn num_channels(&self) -> usize { self.num_channels }
    pub fn buffer_mode(&self) -> BufferMode { self.buffer_mode }
    pub fn frequencies(&self) -> &[f64] { &self.frequencies }
    pub fn bands(&self) -> &[FrequencyBand] { &self.bands }
    pub fn smoothing(&self) -> Smoothing { self.smoothing }
    pub fn smoothing_window(&self) -> usize { self.smoothing_window }

    validated_setter!(set_sample_rate, sample_rate: f64);
    validated_setter!(
        /// Must be a power of two
        set_sample_size, sample_size: usize
    );
    validated_setter!(set_cycles_per_second, cycles_per_second: f64);
    validated_setter!(
        /// `None` analyses the full frame every cycle
        set_samples_per_cycle, samples_per_cycle: Option<usize>
    );
    validated_setter!(set_window_function, window_function: WindowFunction);
    validated_setter!(set_pass_filter, pass_filter: PassFilter);
    validated_setter!(set_low_pass_frequency, low_pass_frequency: f64);
    validated_setter!(set_high_pass_frequency, high_pass_frequency: f64);
    validated_setter!(set_low_pass_factor, low_pass_factor: f64);
    validated_setter!(set_high_pass_factor, high_pass_factor: f64);
    validated_setter!(set_normalize_signal, normalize_signal: bool);
    validated_setter!(set_signal_scale, signal_scale: f64);
    validated_setter!(set_normalize_fft, normalize_fft: bool);
    validated_setter!(set_absolute_values, absolute_values: bool);
    validated_setter!(set_normalize_power, normalize_power: bool);
    validated_setter!(set_reference_frequencies, reference_frequencies: Vec<f64>);
    validated_setter!(set_baseline, baseline: bool);
    validated_setter!(set_baseline_value, baseline_value: f64);
    validated_setter!(set_channel_index, channel_index: usize);
    validated_setter!(set_num_channels, num_channels: usize);
    validated_setter!(set_buffer_mode, buffer_mode: BufferMode);
    validated_setter!(set_frequencies, frequencies: Vec<f64>);
    validated_setter!(set_bands, bands: Vec<FrequencyBand>);
    validated_setter!(set_smoothing, smoothing: Smoothing);
    validated_setter!(set_smoothing_window, smoothing_window: usize);

    /// Set the FFT normalization sub-range in Hz
    pub fn set_normalize_fft_range(&mut self, low: f64, high: f64) -> SpectraResult<()> {
        self.update(|c| {
            c.normalize_fft_low = low;
            c.normalize_fft_high = high;
        })
    }
}

fn check_fraction(label: &str, cutoff: f64, fraction: f64) -> SpectraResult<()> {
    if !cutoff.is_finite() || cutoff <= 0.0 {
        return Err(config_error!("{} pass frequency must be positive, got {}", label, cutoff));
    }
    if !(fraction > 0.0 && fraction < 0.5) {
        return Err(config_error!(
            "{} pass frequency {}Hz gives normalized cutoff {:.4}, outside (0, 0.5)",
            label,
            cutoff,
            fraction
        ));
    }
    Ok(())
}
