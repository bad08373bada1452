//! Synthetic EEG source producing timestamped multi-channel rows

use crate::signal_patterns::RhythmPattern;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use spectra_core::time::{unix_nanos, NANOS_PER_SECOND};
use spectra_core::{config_error, SampleRow, SpectraError, SpectraResult};
use std::f64::consts::PI;

/// Configuration for EEG simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EegConfig {
    /// Sampling rate in Hz
    pub sample_rate: f64,
    /// Number of channels per row
    pub channel_count: usize,
    /// Rhythm mixture to generate
    pub pattern: RhythmPattern,
    pub noise: NoiseConfig,
    /// Mains interference frequency (50/60 Hz), none when unset
    pub powerline_freq: Option<f64>,
    /// Capture-time jitter, uniform in ± this many microseconds
    pub timestamp_jitter_us: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

/// Noise added on top of the rhythms, in microvolts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Gaussian noise standard deviation (0.0 = no noise)
    pub gaussian_std: f64,
    /// Slow baseline drift amplitude
    pub baseline_wander: f64,
    /// Mains interference amplitude
    pub powerline_amplitude: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            gaussian_std: 4.0,
            baseline_wander: 5.0,
            powerline_amplitude: 3.0,
        }
    }
}

impl Default for EegConfig {
    fn default() -> Self {
        Self {
            sample_rate: 512.0,
            channel_count: 1,
            pattern: RhythmPattern::Resting,
            noise: NoiseConfig::default(),
            powerline_freq: Some(50.0),
            timestamp_jitter_us: 200.0,
            seed: None,
        }
    }
}

impl EegConfig {
    pub fn validate(&self) -> SpectraResult<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(config_error!("simulated sample rate must be positive, got {}", self.sample_rate));
        }
        if self.channel_count == 0 {
            return Err(config_error!("simulated channel count must be positive"));
        }
        if !self.noise.gaussian_std.is_finite() || self.noise.gaussian_std < 0.0 {
            return Err(config_error!("noise deviation must be non-negative"));
        }
        // jitter must keep capture times strictly increasing
        let half_period_us = 0.5e6 / self.sample_rate;
        let jitter = self.timestamp_jitter_us;
        if !jitter.is_finite() || jitter < 0.0 || jitter >= half_period_us {
            return Err(config_error!(
                "timestamp jitter {}us must stay below half a sample period ({}us)",
                self.timestamp_jitter_us,
                half_period_us
            ));
        }
        Ok(())
    }

    fn sample_period_nanos(&self) -> f64 {
        NANOS_PER_SECOND as f64 / self.sample_rate
    }
}

/// EEG signal simulator
///
/// Generation is continuous: consecutive calls pick up where the previous one
/// stopped, both in signal time and in capture time.
#[derive(Debug)]
pub struct EegSimulator {
    config: EegConfig,
    rng: StdRng,
    normal_dist: Normal<f64>,
    /// Capture time of sample zero
    start_nanos: i64,
    /// Samples generated since `start_nanos`
    sample_index: u64,
}

impl EegSimulator {
    pub fn new(config: EegConfig) -> SpectraResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let normal_dist = Self::noise_distribution(&config)?;

        Ok(EegSimulator {
            config,
            rng,
            normal_dist,
            start_nanos: unix_nanos(),
            sample_index: 0,
        })
    }

    fn noise_distribution(config: &EegConfig) -> SpectraResult<Normal<f64>> {
        Normal::new(0.0, config.noise.gaussian_std).map_err(|e| SpectraError::InvalidConfig {
            reason: format!("failed to create normal distribution: {}", e),
        })
    }

    /// Generate every row falling within the next `duration` seconds
    pub fn generate(&mut self, duration: f64) -> Vec<SampleRow> {
        let count = (duration * self.config.sample_rate).round().max(0.0) as usize;
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            rows.push(self.next_row());
        }
        rows
    }

    /// Rows whose nominal capture time is before `until_nanos`
    pub fn generate_until(&mut self, until_nanos: i64) -> Vec<SampleRow> {
        let mut rows = Vec::new();
        while self.nominal_time(self.sample_index) < until_nanos {
            rows.push(self.next_row());
        }
        rows
    }

    fn nominal_time(&self, index: u64) -> i64 {
        self.start_nanos + (index as f64 * self.config.sample_period_nanos()).round() as i64
    }

    fn next_row(&mut self) -> SampleRow {
        let index = self.sample_index;
        self.sample_index += 1;
        let time = index as f64 / self.config.sample_rate;

        let values = (0..self.config.channel_count)
            .map(|channel| self.sample_value(time, channel))
            .collect();

        let jitter_nanos = if self.config.timestamp_jitter_us > 0.0 {
            let limit = self.config.timestamp_jitter_us * 1e3;
            self.rng.gen_range(-limit..limit).round() as i64
        } else {
            0
        };
        SampleRow::new(self.nominal_time(index) + jitter_nanos, values)
    }

    fn sample_value(&mut self, time: f64, channel: usize) -> f64 {
        // neighbouring electrodes see the same rhythms slightly out of phase
        let phase = channel as f64 * 0.35;
        let mut value = self.config.pattern.value_at(time, phase);

        value += self.normal_dist.sample(&mut self.rng);
        value += self.config.noise.baseline_wander * (2.0 * PI * 0.1 * time).sin();
        if let Some(mains) = self.config.powerline_freq {
            value += self.config.noise.powerline_amplitude * (2.0 * PI * mains * time).sin();
        }
        value
    }

    /// Restart signal time at zero with capture times anchored at `start_nanos`
    pub fn restart_at(&mut self, start_nanos: i64) {
        self.start_nanos = start_nanos;
        self.sample_index = 0;
    }

    /// Keep signal time running but anchor the next sample at `nanos`
    pub fn reanchor(&mut self, nanos: i64) {
        let elapsed = (self.sample_index as f64 * self.config.sample_period_nanos()).round() as i64;
        self.start_nanos = nanos - elapsed;
    }

    pub fn samples_generated(&self) -> u64 {
        self.sample_index
    }

    pub fn config(&self) -> &EegConfig {
        &self.config
    }

    /// Swap the configuration; signal time continues
    pub fn update_config(&mut self, config: EegConfig) -> SpectraResult<()> {
        config.validate()?;
        self.normal_dist = Self::noise_distribution(&config)?;
        let now_anchor = self.nominal_time(self.sample_index);
        self.config = config;
        self.reanchor(now_anchor);
        Ok(())
    }

    pub fn set_pattern(&mut self, pattern: RhythmPattern) {
        self.config.pattern = pattern;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectra_core::DspConfig;
    use spectra_processing::{FftAnalyzer, Frame, SpectralAnalyzer};

    fn seeded(pattern: RhythmPattern) -> EegConfig {
        EegConfig {
            sample_rate: 256.0,
            pattern,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_row_count_and_monotonic_times() {
        let mut config = seeded(RhythmPattern::Resting);
        config.channel_count = 3;
        let mut simulator = EegSimulator::new(config).unwrap();
        simulator.restart_at(0);

        let rows = simulator.generate(1.0);
        assert_eq!(rows.len(), 256);
        assert!(rows.iter().all(|r| r.width() == 3));
        assert!(rows.windows(2).all(|w| w[0].capture_time_nanos < w[1].capture_time_nanos));

        let more = simulator.generate(0.5);
        assert_eq!(more.len(), 128);
        assert!(more[0].capture_time_nanos > rows[255].capture_time_nanos);
        assert_eq!(simulator.samples_generated(), 384);
    }

    #[test]
    fn test_seed_reproducible() {
        let mut a = EegSimulator::new(seeded(RhythmPattern::Focused)).unwrap();
        let mut b = EegSimulator::new(seeded(RhythmPattern::Focused)).unwrap();
        a.restart_at(1_000);
        b.restart_at(1_000);
        assert_eq!(a.generate(0.25), b.generate(0.25));
    }

    #[test]
    fn test_generate_until() {
        let mut simulator = EegSimulator::new(seeded(RhythmPattern::Resting)).unwrap();
        simulator.restart_at(0);
        let rows = simulator.generate_until(NANOS_PER_SECOND / 2);
        assert_eq!(rows.len(), 128);
        assert!(simulator.generate_until(NANOS_PER_SECOND / 2).is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EegConfig::default();
        config.timestamp_jitter_us = 5_000.0;
        assert!(EegSimulator::new(config).is_err());

        let mut config = EegConfig::default();
        config.channel_count = 0;
        assert!(EegSimulator::new(config).is_err());

        let mut simulator = EegSimulator::new(EegConfig::default()).unwrap();
        let mut bad = EegConfig::default();
        bad.sample_rate = 0.0;
        assert!(simulator.update_config(bad).is_err());
        assert_eq!(simulator.config().sample_rate, 512.0);
    }

    #[test]
    fn test_dominant_rhythm_survives_noise() {
        let config = DspConfig::default();
        let analyzer = FftAnalyzer::new(&config);

        for (pattern, dominant, weaker) in [
            (RhythmPattern::Resting, (8.0, 13.0), (13.0, 30.0)),
            (RhythmPattern::Focused, (13.0, 30.0), (4.0, 8.0)),
            (RhythmPattern::DeepSleep, (1.0, 4.0), (8.0, 13.0)),
        ] {
            let mut simulator = EegSimulator::new(seeded(pattern)).unwrap();
            let values: Vec<f64> = simulator.generate(1.0).iter().map(|r| r.values[0]).collect();
            let frame = Frame::new(values, 256.0, 0);
            let strong = analyzer.band_power(&frame, dominant.0, dominant.1).unwrap();
            let weak = analyzer.band_power(&frame, weaker.0, weaker.1).unwrap();
            assert!(strong > weak, "{:?} vs {:?}", dominant, weaker);
        }
    }
}
