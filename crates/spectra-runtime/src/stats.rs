//! Cycle statistics

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters describing how the schedule is keeping up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    pub is_running: bool,
    /// Ticks fired by the timing thread
    pub ticks: u64,
    /// Ticks that produced a snapshot
    pub completed: u64,
    /// Ticks abandoned with an error or panic
    pub failed: u64,
    /// Ticks that found no usable frame
    pub stale: u64,
    /// Ticks coalesced because the worker was still busy
    pub coalesced: u64,
    pub last_latency_us: u64,
    pub average_latency_us: u64,
    /// Wall-clock millis of the last finished tick
    pub last_update: u64,
}

/// Shared recorder updated by the timing and worker threads
#[derive(Debug, Default)]
pub struct StatsRecorder {
    stats: Mutex<CycleStats>,
    total_latency_us: Mutex<u128>,
}

/// How a tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    Completed,
    Stale,
    Failed,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CycleStats {
        self.stats.lock().clone()
    }

    pub fn set_running(&self, running: bool) {
        self.stats.lock().is_running = running;
    }

    pub fn record_fired(&self) {
        self.stats.lock().ticks += 1;
    }

    pub fn record_coalesced(&self) {
        self.stats.lock().coalesced += 1;
    }

    pub fn record_tick(&self, result: TickResult, latency: Duration) {
        let latency_us = latency.as_micros();
        let mut total = self.total_latency_us.lock();
        let mut stats = self.stats.lock();

        match result {
            TickResult::Completed => stats.completed += 1,
            TickResult::Stale => stats.stale += 1,
            TickResult::Failed => stats.failed += 1,
        }
        *total += latency_us;
        let finished = stats.completed + stats.stale + stats.failed;
        stats.last_latency_us = latency_us as u64;
        stats.average_latency_us = (*total / finished as u128) as u64;
        stats.last_update = (spectra_core::time::unix_nanos() / spectra_core::time::NANOS_PER_MILLI) as u64;
    }

    pub fn reset(&self) {
        *self.stats.lock() = CycleStats::default();
        *self.total_latency_us.lock() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_average() {
        let recorder = StatsRecorder::new();
        recorder.record_fired();
        recorder.record_fired();
        recorder.record_fired();
        recorder.record_coalesced();
        recorder.record_tick(TickResult::Completed, Duration::from_micros(100));
        recorder.record_tick(TickResult::Stale, Duration::from_micros(300));
        recorder.record_tick(TickResult::Failed, Duration::from_micros(200));

        let stats = recorder.snapshot();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.coalesced, 1);
        assert_eq!((stats.completed, stats.stale, stats.failed), (1, 1, 1));
        assert_eq!(stats.last_latency_us, 200);
        assert_eq!(stats.average_latency_us, 200);
        assert!(stats.last_update > 0);

        recorder.reset();
        assert_eq!(recorder.snapshot(), CycleStats::default());
    }
}
