//! Bounded sample buffers
//!
//! Two flavours hold incoming samples until the next frame is built:
//!
//! - [`CircularSampleBuffer`] keeps rows in insertion order and overwrites
//!   the oldest on overflow. Capacity can be auto-tuned to about one second.
//! - [`TimeKeyedBuffer`] keeps a sorted map of capture time to value and is
//!   purged after every frame extraction.
//!
//! Writers never block on readers beyond a short lock; readers get copies.

use parking_lot::{Mutex, RwLock};
use spectra_core::{config_error, SpectraError, SpectraResult};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug)]
struct CircularInner {
    /// Row-major, `capacity * width` values
    data: Vec<f64>,
    capacity: usize,
    width: usize,
    /// Rows written so far, at most `capacity`
    filled: usize,
    tuning: Option<TuningState>,
}

#[derive(Debug, Clone, Copy)]
struct TuningState {
    started: Instant,
    rows: u64,
}

impl CircularInner {
    fn push_rows(&mut self, values: &[f64]) {
        let width = self.width;
        let incoming = values.len() / width;
        if let Some(tuning) = self.tuning.as_mut() {
            tuning.rows += incoming as u64;
        }
        if incoming == 0 || self.capacity == 0 {
            return;
        }

        // only the newest `capacity` rows can survive
        let skip = incoming.saturating_sub(self.capacity);
        let values = &values[skip * width..];
        let incoming = incoming - skip;

        let overflow = (self.filled + incoming).saturating_sub(self.capacity);
        if overflow > 0 {
            self.data.copy_within(overflow * width..self.filled * width, 0);
            self.filled -= overflow;
        }
        let start = self.filled * width;
        self.data[start..start + values.len()].copy_from_slice(values);
        self.filled += incoming;
    }

    fn resize(&mut self, new_capacity: usize) {
        let width = self.width;
        let keep = self.filled.min(new_capacity);
        let mut data = vec![0.0; new_capacity * width];
        let from = (self.filled - keep) * width;
        data[..keep * width].copy_from_slice(&self.data[from..self.filled * width]);
        self.data = data;
        self.capacity = new_capacity;
        self.filled = keep;
    }

    fn row(&self, index: usize) -> Vec<f64> {
        self.data[index * self.width..(index + 1) * self.width].to_vec()
    }
}

/// Fixed-capacity overwrite-on-full row buffer
#[derive(Debug)]
pub struct CircularSampleBuffer {
    inner: Mutex<CircularInner>,
}

impl CircularSampleBuffer {
    /// Buffer of `capacity` rows, `width` channels each, zero-filled
    pub fn new(capacity: usize, width: usize) -> SpectraResult<Self> {
        if width == 0 {
            return Err(config_error!("buffer width must be positive"));
        }
        Ok(Self {
            inner: Mutex::new(CircularInner {
                data: vec![0.0; capacity * width],
                capacity,
                width,
                filled: 0,
                tuning: None,
            }),
        })
    }

    /// Append rows given as a flat slice of `width`-sized chunks
    ///
    /// On overflow the contents shift left by the overflow amount first.
    pub fn add_all(&self, values: &[f64]) -> SpectraResult<()> {
        let mut inner = self.inner.lock();
        if values.len() % inner.width != 0 {
            return Err(config_error!(
                "{} values do not form rows of width {}",
                values.len(),
                inner.width
            ));
        }
        inner.push_rows(values);
        Ok(())
    }

    /// Append a single row
    pub fn add_row(&self, row: &[f64]) -> SpectraResult<()> {
        let mut inner = self.inner.lock();
        if row.len() != inner.width {
            return Err(config_error!(
                "row has {} values, buffer width is {}",
                row.len(),
                inner.width
            ));
        }
        inner.push_rows(row);
        Ok(())
    }

    /// Change capacity keeping the most recent rows, zero padding when growing
    pub fn resize(&self, new_capacity: usize) {
        self.inner.lock().resize(new_capacity);
    }

    /// Full flat copy, `capacity * width` values
    pub fn snapshot(&self) -> Vec<f64> {
        self.inner.lock().data.clone()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn width(&self) -> usize {
        self.inner.lock().width
    }

    /// Rows written and not yet evicted
    pub fn filled(&self) -> usize {
        self.inner.lock().filled
    }

    /// Every row of the buffer, oldest first
    pub fn current_second(&self) -> Vec<Vec<f64>> {
        let inner = self.inner.lock();
        (0..inner.capacity).map(|i| inner.row(i)).collect()
    }

    /// `n` evenly spaced rows, `interval = total_rows / n`
    pub fn current_second_sampled(&self, n: usize) -> SpectraResult<Vec<Vec<f64>>> {
        let inner = self.inner.lock();
        let total = inner.capacity;
        if n == 0 || n >= total {
            return Err(SpectraError::SampleCountOutOfRange {
                requested: n,
                available: total,
            });
        }
        let interval = total / n;
        Ok((0..n).map(|i| inner.row(i * interval)).collect())
    }

    /// Copy of one channel across all rows
    pub fn channel_series(&self, channel: usize) -> SpectraResult<Vec<f64>> {
        let inner = self.inner.lock();
        if channel >= inner.width {
            return Err(config_error!(
                "channel {} out of range for width {}",
                channel,
                inner.width
            ));
        }
        Ok(inner.data.iter().skip(channel).step_by(inner.width).copied().collect())
    }

    /// One channel of every row, or of `n` evenly spaced rows, together with
    /// the fraction of the buffer the picked rows stand for
    ///
    /// Each picked row covers `interval` buffer rows, so `n` rows cover
    /// `n * interval / capacity` of it.
    pub fn channel_window(&self, channel: usize, n: Option<usize>) -> SpectraResult<(Vec<f64>, f64)> {
        let inner = self.inner.lock();
        if channel >= inner.width {
            return Err(config_error!(
                "channel {} out of range for width {}",
                channel,
                inner.width
            ));
        }
        let total = inner.capacity;
        let (count, interval) = match n {
            None => (total, 1),
            Some(n) if n == 0 || n >= total => {
                return Err(SpectraError::SampleCountOutOfRange {
                    requested: n,
                    available: total,
                })
            }
            Some(n) => (n, total / n),
        };
        let series = (0..count)
            .map(|i| inner.data[i * interval * inner.width + channel])
            .collect();
        let covered = if total == 0 {
            1.0
        } else {
            (count * interval) as f64 / total as f64
        };
        Ok((series, covered))
    }

    /// Start counting delivered rows
    pub fn tune(&self) {
        self.inner.lock().tuning = Some(TuningState {
            started: Instant::now(),
            rows: 0,
        });
        info!("buffer auto-tuning started");
    }

    pub fn is_tuning(&self) -> bool {
        self.inner.lock().tuning.is_some()
    }

    /// Stop counting and resize to hold about one second; returns the rate
    pub fn stop_tuning(&self) -> SpectraResult<f64> {
        let elapsed = {
            let inner = self.inner.lock();
            let tuning = inner.tuning.ok_or(SpectraError::InvalidState {
                reason: "buffer is not tuning",
            })?;
            tuning.started.elapsed()
        };
        self.finish_tuning(elapsed)
    }

    fn finish_tuning(&self, elapsed: Duration) -> SpectraResult<f64> {
        let mut inner = self.inner.lock();
        let tuning = inner.tuning.take().ok_or(SpectraError::InvalidState {
            reason: "buffer is not tuning",
        })?;
        let seconds = elapsed.as_secs_f64();
        if tuning.rows == 0 || seconds <= 0.0 {
            return Err(SpectraError::InvalidState {
                reason: "no samples received while tuning",
            });
        }

        let measured_rate = tuning.rows as f64 / seconds;
        let capacity = (measured_rate.round() as usize).max(1);
        inner.resize(capacity);
        info!(measured_rate, capacity, "buffer auto-tuning finished");
        Ok(measured_rate)
    }
}

/// Sorted capture-time → value map
#[derive(Debug, Default)]
pub struct TimeKeyedBuffer {
    map: RwLock<BTreeMap<i64, f64>>,
    running: AtomicBool,
}

impl TimeKeyedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept samples from now on
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Reject samples from now on; stored data is kept
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Insert a sample; ignored unless running
    pub fn add_signal(&self, capture_time_nanos: i64, value: f64) -> bool {
        if !self.is_running() {
            return false;
        }
        self.map.write().insert(capture_time_nanos, value);
        true
    }

    /// Largest key `<= key`
    pub fn floor_key(&self, key: i64) -> Option<i64> {
        self.map.read().range(..=key).next_back().map(|(&k, _)| k)
    }

    /// Floor key of `key` and a copy of every entry from it onwards
    pub fn tail_from_floor(&self, key: i64) -> Option<(i64, Vec<(i64, f64)>)> {
        let map = self.map.read();
        let from = map.range(..=key).next_back().map(|(&k, _)| k)?;
        let tail = map.range(from..).map(|(&k, &v)| (k, v)).collect();
        Some((from, tail))
    }

    /// Drop every entry older than `from_key`
    pub fn clean_map(&self, from_key: i64) -> usize {
        let mut map = self.map.write();
        let kept = map.split_off(&from_key);
        let removed = map.len();
        *map = kept;
        if removed > 0 {
            debug!(removed, remaining = map.len(), "purged stale samples");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }
}
