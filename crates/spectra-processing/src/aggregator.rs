//! Combining per-cycle snapshots over time

use spectra_core::{DspConfig, PowerSnapshot, Smoothing, SpectraError, SpectraResult};
use std::collections::VecDeque;
use tracing::{debug, info};

/// `Σ(w·v) / (N(N+1)/2)` with weights `1..=N` oldest to newest
pub fn weighted_moving_average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let sum: f64 = values
        .iter()
        .enumerate()
        .map(|(i, v)| (i + 1) as f64 * v)
        .sum();
    Some(sum / (n * (n + 1.0) / 2.0))
}

/// Per key `sqrt(Σ rank·p² / Σ rank)`, rank 1 for the oldest snapshot
///
/// Every snapshot must carry the key set of the first one.
pub fn recency_weighted_rms(snapshots: &[PowerSnapshot]) -> SpectraResult<PowerSnapshot> {
    combine(snapshots, |column| {
        let (weighted, ranks) = column
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sum, total), (i, p)| {
                let rank = (i + 1) as f64;
                (sum + rank * p * p, total + rank)
            });
        (weighted / ranks).sqrt()
    })
}

/// Per key weighted moving average of the snapshots
pub fn weighted_moving_average_snapshots(snapshots: &[PowerSnapshot]) -> SpectraResult<PowerSnapshot> {
    combine(snapshots, |column| weighted_moving_average(column).unwrap_or(0.0))
}

fn combine<F>(snapshots: &[PowerSnapshot], reduce: F) -> SpectraResult<PowerSnapshot>
where
    F: Fn(&[f64]) -> f64,
{
    let newest = snapshots.last().ok_or(SpectraError::InvalidState {
        reason: "no snapshots to combine",
    })?;
    let reference = &snapshots[0];
    for (index, snapshot) in snapshots.iter().enumerate().skip(1) {
        if !reference.same_keys(snapshot) {
            return Err(SpectraError::SnapshotKeyMismatch {
                expected: reference.len(),
                actual: snapshot.len(),
                index,
            });
        }
    }

    let mut column = Vec::with_capacity(snapshots.len());
    let powers: Vec<f64> = (0..reference.len())
        .map(|key| {
            column.clear();
            column.extend(snapshots.iter().map(|s| s.entries()[key].power));
            reduce(&column)
        })
        .collect();
    newest.with_powers(&powers)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BaselineState {
    Off,
    /// Running minimum, not yet applied
    Calculating(Option<f64>),
    Fixed(f64),
}

/// Rolling history of snapshots with smoothing and baseline subtraction
#[derive(Debug)]
pub struct BandAggregator {
    history: VecDeque<PowerSnapshot>,
    window: usize,
    smoothing: Smoothing,
    baseline: BaselineState,
    // configured (enabled, value) the baseline was last seeded from
    seeded_from: (bool, f64),
}

impl BandAggregator {
    pub fn new(config: &DspConfig) -> Self {
        let mut aggregator = Self {
            history: VecDeque::with_capacity(config.smoothing_window()),
            window: config.smoothing_window(),
            smoothing: config.smoothing(),
            baseline: BaselineState::Off,
            seeded_from: (false, 0.0),
        };
        aggregator.seed_baseline(config);
        aggregator
    }

    /// Apply smoothing settings; the oldest history is dropped when the window shrinks
    ///
    /// The baseline is reseeded only when its configured values changed, so a
    /// calculated baseline survives unrelated changes.
    pub fn reconfigure(&mut self, config: &DspConfig) {
        self.smoothing = config.smoothing();
        self.window = config.smoothing_window();
        while self.history.len() > self.window {
            self.history.pop_front();
        }
        let configured = (config.baseline(), config.baseline_value());
        if configured != self.seeded_from && !self.is_calculating_baseline() {
            self.seed_baseline(config);
        }
    }

    fn seed_baseline(&mut self, config: &DspConfig) {
        self.seeded_from = (config.baseline(), config.baseline_value());
        self.baseline = if config.baseline() && config.baseline_value() > 0.0 {
            BaselineState::Fixed(config.baseline_value())
        } else {
            BaselineState::Off
        };
    }

    /// Add the newest snapshot and return the smoothed, baseline-adjusted one
    pub fn push(&mut self, snapshot: PowerSnapshot) -> SpectraResult<PowerSnapshot> {
        if let Some(last) = self.history.back() {
            if !last.same_keys(&snapshot) {
                return Err(SpectraError::SnapshotKeyMismatch {
                    expected: last.len(),
                    actual: snapshot.len(),
                    index: self.history.len(),
                });
            }
        }
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(snapshot);

        let history = self.history.make_contiguous();
        let smoothed = match self.smoothing {
            Smoothing::RecencyRms => recency_weighted_rms(history)?,
            Smoothing::WeightedMovingAverage => weighted_moving_average_snapshots(history)?,
        };
        Ok(self.apply_baseline(smoothed))
    }

    fn apply_baseline(&mut self, smoothed: PowerSnapshot) -> PowerSnapshot {
        match self.baseline {
            BaselineState::Off => smoothed,
            BaselineState::Calculating(current) => {
                let observed = smoothed
                    .entries()
                    .iter()
                    .filter(|e| !e.is_point())
                    .map(|e| e.power)
                    .fold(f64::INFINITY, f64::min);
                if observed.is_finite() {
                    let minimum = current.map_or(observed, |m| m.min(observed));
                    self.baseline = BaselineState::Calculating(Some(minimum));
                }
                smoothed
            }
            BaselineState::Fixed(value) => smoothed.map_powers(|p| p - value),
        }
    }

    /// Start tracking the running minimum across band outputs
    pub fn calculate_baseline(&mut self) {
        self.baseline = BaselineState::Calculating(None);
        info!("baseline calculation started");
    }

    /// Freeze the tracked minimum and subtract it from future outputs
    pub fn stop_calculate_baseline(&mut self) -> SpectraResult<f64> {
        match self.baseline {
            BaselineState::Calculating(Some(minimum)) => {
                self.baseline = BaselineState::Fixed(minimum);
                info!(baseline = minimum, "baseline fixed");
                Ok(minimum)
            }
            BaselineState::Calculating(None) => {
                self.baseline = BaselineState::Off;
                Err(SpectraError::InvalidState {
                    reason: "no band output observed while calculating baseline",
                })
            }
            _ => Err(SpectraError::InvalidState {
                reason: "baseline calculation not running",
            }),
        }
    }

    /// Forget the baseline; outputs pass through unchanged
    pub fn reset_baseline(&mut self) {
        self.baseline = BaselineState::Off;
        debug!("baseline reset");
    }

    /// Value currently subtracted, zero when none
    pub fn baseline(&self) -> f64 {
        match self.baseline {
            BaselineState::Fixed(value) => value,
            _ => 0.0,
        }
    }

    pub fn is_calculating_baseline(&self) -> bool {
        matches!(self.baseline, BaselineState::Calculating(_))
    }

    /// Drop the history, e.g. after the output keys changed
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(t: i64, alpha: f64, ten: f64) -> PowerSnapshot {
        PowerSnapshot::builder(t, 256.0)
            .band(8.0, 13.0, alpha).unwrap()
            .frequency(10.0, ten).unwrap()
            .build()
    }

    #[test]
    fn test_wma() {
        let (a, b, c) = (1.0, 4.0, 7.0);
        let wma = weighted_moving_average(&[a, b, c]).unwrap();
        assert!((wma - (a + 2.0 * b + 3.0 * c) / 6.0).abs() < 1e-12);
        assert_eq!(weighted_moving_average(&[]), None);
        assert_eq!(weighted_moving_average(&[5.0]), Some(5.0));
    }

    #[test]
    fn test_rms_of_two() {
        let (p1, p2) = (3.0, 5.0);
        let rms = recency_weighted_rms(&[snapshot(1, p1, 1.0), snapshot(2, p2, 1.0)]).unwrap();
        let expected = ((p1 * p1 + 2.0 * p2 * p2) / 3.0).sqrt();
        assert!((rms.band(8.0, 13.0).unwrap() - expected).abs() < 1e-12);
        assert_eq!(rms.capture_time_nanos(), 2);
    }

    #[test]
    fn test_rms_key_mismatch() {
        let other = PowerSnapshot::builder(3, 256.0).frequency(10.0, 1.0).unwrap().build();
        let result = recency_weighted_rms(&[snapshot(1, 1.0, 1.0), other]);
        assert!(matches!(result, Err(SpectraError::SnapshotKeyMismatch { index: 1, .. })));
        assert!(recency_weighted_rms(&[]).is_err());
    }

    #[test]
    fn test_rolling_window() {
        let mut config = DspConfig::default();
        config.set_smoothing_window(2).unwrap();
        config.set_smoothing(Smoothing::WeightedMovingAverage).unwrap();
        let mut aggregator = BandAggregator::new(&config);

        aggregator.push(snapshot(1, 100.0, 0.0)).unwrap();
        aggregator.push(snapshot(2, 3.0, 0.0)).unwrap();
        let out = aggregator.push(snapshot(3, 6.0, 0.0)).unwrap();
        // oldest evicted: (3 + 2*6) / 3
        assert!((out.band(8.0, 13.0).unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(aggregator.history_len(), 2);
    }

    #[test]
    fn test_push_rejects_new_keys() {
        let mut aggregator = BandAggregator::new(&DspConfig::default());
        aggregator.push(snapshot(1, 1.0, 1.0)).unwrap();
        let other = PowerSnapshot::builder(2, 256.0).frequency(12.0, 1.0).unwrap().build();
        assert!(aggregator.push(other.clone()).is_err());

        aggregator.clear_history();
        assert!(aggregator.push(other).is_ok());
    }

    #[test]
    fn test_baseline_lifecycle() {
        let mut config = DspConfig::default();
        config.set_smoothing_window(1).unwrap();
        let mut aggregator = BandAggregator::new(&config);

        assert!(aggregator.stop_calculate_baseline().is_err());
        aggregator.calculate_baseline();
        aggregator.push(snapshot(1, 4.0, 0.5)).unwrap();
        aggregator.push(snapshot(2, 2.5, 0.1)).unwrap();
        let out = aggregator.push(snapshot(3, 3.0, 0.2)).unwrap();
        // passthrough while calculating
        assert!((out.band(8.0, 13.0).unwrap() - 3.0).abs() < 1e-12);

        // point outputs do not take part in the minimum
        assert!((aggregator.stop_calculate_baseline().unwrap() - 2.5).abs() < 1e-12);
        let out = aggregator.push(snapshot(4, 4.0, 3.0)).unwrap();
        assert!((out.band(8.0, 13.0).unwrap() - 1.5).abs() < 1e-12);
        assert!((out.power(10.0).unwrap() - 0.5).abs() < 1e-12);

        aggregator.reset_baseline();
        assert_eq!(aggregator.baseline(), 0.0);
        let out = aggregator.push(snapshot(5, 4.0, 3.0)).unwrap();
        assert!((out.band(8.0, 13.0).unwrap() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_configured_baseline_seeds() {
        let mut config = DspConfig::default();
        config.set_baseline(true).unwrap();
        config.set_baseline_value(1.0).unwrap();
        config.set_smoothing_window(1).unwrap();
        let mut aggregator = BandAggregator::new(&config);
        assert_eq!(aggregator.baseline(), 1.0);
        let out = aggregator.push(snapshot(1, 3.0, 2.0)).unwrap();
        assert!((out.band(8.0, 13.0).unwrap() - 2.0).abs() < 1e-12);

        config.set_baseline(false).unwrap();
        aggregator.reconfigure(&config);
        assert_eq!(aggregator.baseline(), 0.0);
    }

    #[test]
    fn test_calculated_baseline_survives_unrelated_change() {
        let mut config = DspConfig::default();
        config.set_smoothing_window(1).unwrap();
        let mut aggregator = BandAggregator::new(&config);
        aggregator.calculate_baseline();
        aggregator.push(snapshot(1, 2.0, 1.0)).unwrap();
        aggregator.stop_calculate_baseline().unwrap();

        config.set_smoothing_window(3).unwrap();
        aggregator.reconfigure(&config);
        assert_eq!(aggregator.baseline(), 2.0);
    }
}
