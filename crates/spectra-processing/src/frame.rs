//! Fixed-length frames and their extraction from the sample buffers

use crate::buffer::{CircularSampleBuffer, TimeKeyedBuffer};
use crate::spectrum::Spectrum;
use once_cell::sync::OnceCell;
use spectra_core::time::{JITTER_BUDGET_NANOS, NANOS_PER_SECOND};
use spectra_core::{DspConfig, SpectraResult};
use tracing::{debug, trace};

/// One second of evenly spaced samples ready for analysis
///
/// Immutable once built. The spectrum and the power normalization scale are
/// computed lazily, at most once, whatever the number of concurrent readers.
#[derive(Debug, Clone)]
pub struct Frame {
    values: Vec<f64>,
    sample_rate: f64,
    capture_time_nanos: i64,
    source_timestamps: Vec<i64>,
    spectrum: OnceCell<Spectrum>,
    normalization: OnceCell<f64>,
}

impl Frame {
    pub fn new(values: Vec<f64>, sample_rate: f64, capture_time_nanos: i64) -> Self {
        Self {
            values,
            sample_rate,
            capture_time_nanos,
            source_timestamps: Vec::new(),
            spectrum: OnceCell::new(),
            normalization: OnceCell::new(),
        }
    }

    /// Frame that remembers the capture time of every picked sample
    pub fn with_source_timestamps(mut self, timestamps: Vec<i64>) -> Self {
        self.source_timestamps = timestamps;
        self
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }

    pub fn capture_time_nanos(&self) -> i64 {
        self.capture_time_nanos
    }

    /// Capture times of the samples the frame was built from; empty for
    /// frames taken from the circular buffer
    pub fn source_timestamps(&self) -> &[i64] {
        &self.source_timestamps
    }

    /// Memoized spectrum, computed by `compute` on first access
    pub fn spectrum_or_init<F>(&self, compute: F) -> SpectraResult<&Spectrum>
    where
        F: FnOnce(&[f64], f64) -> SpectraResult<Spectrum>,
    {
        self.spectrum
            .get_or_try_init(|| compute(&self.values, self.sample_rate))
    }

    /// Spectrum if already computed
    pub fn cached_spectrum(&self) -> Option<&Spectrum> {
        self.spectrum.get()
    }

    /// Memoized power normalization scale
    pub fn normalization_or_init<F>(&self, compute: F) -> SpectraResult<f64>
    where
        F: FnOnce() -> SpectraResult<f64>,
    {
        self.normalization.get_or_try_init(compute).copied()
    }
}

/// Extracts frames from either buffer flavour
#[derive(Debug, Clone, Copy)]
pub struct FrameBuilder {
    sample_size: usize,
}

impl FrameBuilder {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    pub fn from_config(config: &DspConfig) -> Self {
        Self::new(config.sample_size())
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Frame covering the second before `reference_nanos`
    ///
    /// Returns `None` when the data is incomplete or jittery. Consumed and
    /// stale history is purged in every case where a start key exists.
    pub fn from_time_keyed(&self, buffer: &TimeKeyedBuffer, reference_nanos: i64) -> Option<Frame> {
        let (from, tail) = buffer.tail_from_floor(reference_nanos - NANOS_PER_SECOND)?;
        let picked = self.walk(&tail, from, reference_nanos);
        buffer.clean_map(from);

        let (timestamps, values): (Vec<i64>, Vec<f64>) = picked?.into_iter().unzip();
        trace!(from, reference_nanos, "time-keyed frame built");
        Some(
            Frame::new(values, self.sample_size as f64, reference_nanos)
                .with_source_timestamps(timestamps),
        )
    }

    fn walk(&self, tail: &[(i64, f64)], from: i64, reference_nanos: i64) -> Option<Vec<(i64, f64)>> {
        let last = tail.last()?.0;
        if tail.len() < self.sample_size {
            debug!(entries = tail.len(), needed = self.sample_size, "incomplete window discarded");
            return None;
        }
        if last > reference_nanos + JITTER_BUDGET_NANOS {
            debug!(last, reference_nanos, "jittery window discarded");
            return None;
        }

        let step = NANOS_PER_SECOND as f64 / self.sample_size as f64;
        let mut picked: Vec<(i64, f64)> = Vec::with_capacity(self.sample_size);
        let mut prev: Option<i64> = None;

        for i in 0..self.sample_size {
            let target = from + (i as f64 * step).round() as i64;
            let lower_bound = prev.map_or(target, |p| target.max(p + 1));
            // nearest key at or after the target
            let ceiling = tail.partition_point(|&(k, _)| k < lower_bound);
            let entry = if ceiling < tail.len() {
                tail[ceiling]
            } else {
                // ran off the end: newest key not yet used
                let candidate = tail[tail.len() - 1];
                match prev {
                    Some(p) if candidate.0 <= p => {
                        debug!(picked = picked.len(), "window exhausted before frame filled");
                        return None;
                    }
                    _ => candidate,
                }
            };
            prev = Some(entry.0);
            picked.push(entry);
        }
        Some(picked)
    }

    /// Frame from the circular buffer, resampled to `sample_size` points
    ///
    /// The buffer holds one second. `samples_per_cycle` selects evenly
    /// spaced rows first when set; those cover only part of the second, so
    /// the frame rate is raised to match the span actually covered.
    pub fn from_circular(
        &self,
        buffer: &CircularSampleBuffer,
        channel: usize,
        samples_per_cycle: Option<usize>,
        capture_time_nanos: i64,
    ) -> SpectraResult<Frame> {
        let (series, covered) = buffer.channel_window(channel, samples_per_cycle)?;
        let values = resample_linear(&series, self.sample_size);
        let sample_rate = self.sample_size as f64 / covered;
        Ok(Frame::new(values, sample_rate, capture_time_nanos))
    }
}

/// Linear resampling of `series` to exactly `n` points on the same time grid
///
/// Input point `k` sits at `k / len` and output point `i` at `i / n` of the
/// span, so the output rate is `n / len` times the input rate. Points past
/// the last input hold its value.
pub fn resample_linear(series: &[f64], n: usize) -> Vec<f64> {
    match series.len() {
        0 => vec![0.0; n],
        len if len == n => series.to_vec(),
        len => {
            let scale = len as f64 / n as f64;
            (0..n)
                .map(|i| {
                    let pos = i as f64 * scale;
                    let lower = (pos.floor() as usize).min(len - 1);
                    let upper = (lower + 1).min(len - 1);
                    let frac = pos - lower as f64;
                    series[lower] * (1.0 - frac) + series[upper] * frac
                })
                .collect()
        }
    }
}
