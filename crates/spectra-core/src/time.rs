//! Nanosecond time helpers
//!
//! Capture times travel through the pipeline as `i64` nanoseconds since the
//! Unix epoch. Scheduler deadlines use the same unit so no fractional
//! arithmetic accumulates drift.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Frames whose newest sample lies beyond the reference instant by more than
/// this are considered jittery and discarded
pub const JITTER_BUDGET_NANOS: i64 = 5 * NANOS_PER_MILLI;

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Sleep length split into whole milliseconds and the sub-millisecond rest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepSplit {
    pub millis: u64,
    pub sub_millis_nanos: u32,
}

impl SleepSplit {
    /// Split the distance from `now` to `deadline`; negative distances give zero
    pub fn until(now_nanos: i64, deadline_nanos: i64) -> Self {
        let remaining = (deadline_nanos - now_nanos).max(0);
        Self {
            millis: (remaining / NANOS_PER_MILLI) as u64,
            sub_millis_nanos: (remaining % NANOS_PER_MILLI) as u32,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0 && self.sub_millis_nanos == 0
    }

    pub fn millis_duration(&self) -> Duration {
        Duration::from_millis(self.millis)
    }

    pub fn remainder_duration(&self) -> Duration {
        Duration::from_nanos(self.sub_millis_nanos as u64)
    }
}

/// Period in nanoseconds, at least one
pub fn period_nanos(period: Duration) -> i64 {
    (period.as_nanos() as i64).max(1)
}
