//! Per-cycle power results
//!
//! A [`PowerSnapshot`] maps frequencies and bands to power values. Single
//! frequencies are stored as degenerate bands `(f, f)`. Entries stay sorted by
//! key, so two snapshots with equal key sets line up index by index.

use crate::error::{SpectraError, SpectraResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Power over `[from_frequency, to_frequency]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandPower {
    pub from_frequency: f64,
    pub to_frequency: f64,
    pub power: f64,
}

impl BandPower {
    pub fn new(from_frequency: f64, to_frequency: f64, power: f64) -> Self {
        Self { from_frequency, to_frequency, power }
    }

    /// True for single-frequency entries
    pub fn is_point(&self) -> bool {
        self.from_frequency == self.to_frequency
    }

    fn key_cmp(&self, from: f64, to: f64) -> Ordering {
        self.from_frequency
            .total_cmp(&from)
            .then(self.to_frequency.total_cmp(&to))
    }

    fn same_key(&self, other: &BandPower) -> bool {
        self.key_cmp(other.from_frequency, other.to_frequency) == Ordering::Equal
    }
}

/// Immutable frequency/band → power mapping for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSnapshot {
    capture_time_nanos: i64,
    sample_rate: f64,
    entries: Vec<BandPower>,
}

impl PowerSnapshot {
    /// Start building a snapshot
    pub fn builder(capture_time_nanos: i64, sample_rate: f64) -> PowerSnapshotBuilder {
        PowerSnapshotBuilder {
            snapshot: PowerSnapshot {
                capture_time_nanos,
                sample_rate,
                entries: Vec::new(),
            },
        }
    }

    pub fn capture_time_nanos(&self) -> i64 {
        self.capture_time_nanos
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }

    /// Entries sorted by `(from, to)`
    pub fn entries(&self) -> &[BandPower] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Power at a single registered frequency
    pub fn power(&self, frequency: f64) -> SpectraResult<f64> {
        self.band(frequency, frequency)
    }

    /// Power of a registered band
    pub fn band(&self, from: f64, to: f64) -> SpectraResult<f64> {
        self.entries
            .binary_search_by(|e| e.key_cmp(from, to))
            .map(|i| self.entries[i].power)
            .map_err(|_| SpectraError::UnknownFrequency { from, to })
    }

    /// True when both snapshots carry exactly the same keys
    pub fn same_keys(&self, other: &PowerSnapshot) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.same_key(b))
    }

    /// Same keys and tags, powers replaced in key order
    pub fn with_powers(&self, powers: &[f64]) -> SpectraResult<PowerSnapshot> {
        if powers.len() != self.entries.len() {
            return Err(SpectraError::SnapshotKeyMismatch {
                expected: self.entries.len(),
                actual: powers.len(),
                index: 0,
            });
        }
        let entries = self
            .entries
            .iter()
            .zip(powers)
            .map(|(e, &power)| BandPower { power, ..*e })
            .collect();
        Ok(PowerSnapshot { entries, ..self.clone_tags() })
    }

    /// Same keys and tags, every power mapped through `f`
    pub fn map_powers<F>(&self, mut f: F) -> PowerSnapshot
    where
        F: FnMut(f64) -> f64,
    {
        let entries = self
            .entries
            .iter()
            .map(|e| BandPower { power: f(e.power), ..*e })
            .collect();
        PowerSnapshot { entries, ..self.clone_tags() }
    }

    /// Retag with another capture time
    pub fn at_time(mut self, capture_time_nanos: i64) -> PowerSnapshot {
        self.capture_time_nanos = capture_time_nanos;
        self
    }

    fn clone_tags(&self) -> PowerSnapshot {
        PowerSnapshot {
            capture_time_nanos: self.capture_time_nanos,
            sample_rate: self.sample_rate,
            entries: Vec::new(),
        }
    }
}

/// Validating builder for [`PowerSnapshot`]
#[derive(Debug)]
pub struct PowerSnapshotBuilder {
    snapshot: PowerSnapshot,
}

impl PowerSnapshotBuilder {
    /// Add a single frequency, valid in `(0, nyquist]`
    pub fn frequency(mut self, frequency: f64, power: f64) -> SpectraResult<Self> {
        let nyquist = self.snapshot.nyquist();
        if !(frequency > 0.0 && frequency <= nyquist) {
            return Err(SpectraError::FrequencyOutOfRange { frequency, nyquist });
        }
        self.insert(BandPower::new(frequency, frequency, power));
        Ok(self)
    }

    /// Add a band, valid when `0 < from <= to < nyquist`
    pub fn band(mut self, from: f64, to: f64, power: f64) -> SpectraResult<Self> {
        let nyquist = self.snapshot.nyquist();
        if !(from > 0.0 && from <= to && to < nyquist) {
            return Err(SpectraError::InvalidBand { from, to, nyquist });
        }
        self.insert(BandPower::new(from, to, power));
        Ok(self)
    }

    pub fn build(self) -> PowerSnapshot {
        self.snapshot
    }

    fn insert(&mut self, entry: BandPower) {
        let entries = &mut self.snapshot.entries;
        match entries.binary_search_by(|e| e.key_cmp(entry.from_frequency, entry.to_frequency)) {
            Ok(i) => entries[i] = entry,
            Err(i) => entries.insert(i, entry),
        }
    }
}
