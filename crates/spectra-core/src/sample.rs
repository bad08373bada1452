//! Raw samples as delivered by a producer

use serde::{Deserialize, Serialize};

/// Single scalar reading with its capture time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Nanoseconds since Unix epoch
    pub capture_time_nanos: i64,
    pub value: f64,
}

impl RawSample {
    pub const fn new(capture_time_nanos: i64, value: f64) -> Self {
        Self { capture_time_nanos, value }
    }
}

/// One reading per channel sharing a capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    /// Nanoseconds since Unix epoch
    pub capture_time_nanos: i64,
    pub values: Vec<f64>,
}

impl SampleRow {
    pub fn new(capture_time_nanos: i64, values: Vec<f64>) -> Self {
        Self { capture_time_nanos, values }
    }

    /// Number of channels in this row
    pub fn width(&self) -> usize {
        self.values.len()
    }

    /// Extract a single channel as a [`RawSample`]
    pub fn channel(&self, index: usize) -> Option<RawSample> {
        self.values
            .get(index)
            .map(|&value| RawSample::new(self.capture_time_nanos, value))
    }
}

impl From<RawSample> for SampleRow {
    fn from(sample: RawSample) -> Self {
        SampleRow::new(sample.capture_time_nanos, vec![sample.value])
    }
}
