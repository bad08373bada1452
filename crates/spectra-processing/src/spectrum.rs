//! Log power spectrum of one frame and queries over it

use spectra_core::{SpectraError, SpectraResult};

/// `ln(1 + |X_k|² / N)` for bins `0..=N/2`
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    log_power: Vec<f64>,
    sample_rate: f64,
    fft_size: usize,
}

impl Spectrum {
    pub fn from_log_power(log_power: Vec<f64>, sample_rate: f64, fft_size: usize) -> Self {
        Self { log_power, sample_rate, fft_size }
    }

    pub fn bins(&self) -> &[f64] {
        &self.log_power
    }

    pub fn bin(&self, index: usize) -> Option<f64> {
        self.log_power.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.log_power.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_power.is_empty()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Hz per bin, `sample_rate / fft_size`
    pub fn bin_width(&self) -> f64 {
        self.sample_rate / self.fft_size as f64
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }

    /// An empty spectrum has no valid frequency at all
    fn check_frequency(&self, frequency: f64) -> SpectraResult<()> {
        if self.log_power.is_empty() {
            return Err(SpectraError::FrequencyOutOfRange { frequency, nyquist: 0.0 });
        }
        let nyquist = self.nyquist();
        if frequency > 0.0 && frequency <= nyquist {
            Ok(())
        } else {
            Err(SpectraError::FrequencyOutOfRange { frequency, nyquist })
        }
    }

    /// Power at any frequency in `(0, nyquist]`
    ///
    /// On-bin frequencies return the bin itself. Between bins `k` and `k+1`
    /// the lower bin is weighted by the distance to the upper one and vice
    /// versa.
    pub fn power_at(&self, frequency: f64) -> SpectraResult<f64> {
        self.check_frequency(frequency)?;
        let last = self.log_power.len().saturating_sub(1);
        let position = frequency / self.bin_width();
        let lower = (position.floor() as usize).min(last);
        let fraction = position - lower as f64;

        if fraction <= 0.0 || lower == last {
            return Ok(self.log_power[lower]);
        }
        let upper = lower + 1;
        Ok(self.log_power[lower] * (1.0 - fraction) + self.log_power[upper] * fraction)
    }

    /// Tent-weighted average over the bins inside `[from, to]`
    ///
    /// Weights rise by one from each edge towards the centre: `1,1`,
    /// `1,2,1`, `1,2,2,1`, `1,2,3,2,1`. A band narrower than one bin falls
    /// back to [`Spectrum::power_at`] at `from`.
    pub fn band_power(&self, from: f64, to: f64) -> SpectraResult<f64> {
        if from > to {
            return Err(SpectraError::InvalidBand { from, to, nyquist: self.nyquist() });
        }
        self.check_frequency(from)?;
        self.check_frequency(to)?;

        let width = self.bin_width();
        let first = (from / width).ceil() as usize;
        let last = ((to / width).floor() as usize).min(self.log_power.len().saturating_sub(1));
        if first > last {
            return self.power_at(from);
        }

        let n = last - first + 1;
        let (weighted, total) = self.log_power[first..=last]
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sum, weights), (i, &p)| {
                let w = (i + 1).min(n - i) as f64;
                (sum + w * p, weights + w)
            });
        Ok(weighted / total)
    }

    /// Frequency of the strongest non-DC bin
    pub fn peak_frequency(&self) -> Option<f64> {
        self.log_power
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as f64 * self.bin_width())
    }

    /// Sum of linear power over the non-DC bins
    pub fn total_power(&self) -> f64 {
        self.log_power.iter().skip(1).map(|p| p.exp_m1()).sum()
    }
}
