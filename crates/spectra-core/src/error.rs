//! Error handling for the Spectra pipeline
//!
//! One error type covers every layer: configuration mistakes, out-of-range
//! queries, snapshot consistency violations and failed processing cycles.
//! Incomplete or jittery frames are not errors; they are dropped silently.

use core::fmt;

/// Result type alias for Spectra operations
pub type SpectraResult<T> = Result<T, SpectraError>;

/// Comprehensive error type for all Spectra operations
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SpectraError {
    /// Configuration value rejected at construction or mutation time.
    /// The previously valid configuration stays in effect.
    InvalidConfig {
        /// Description of the configuration error
        reason: String,
    },

    /// Frequency query outside `(0, nyquist]`
    FrequencyOutOfRange {
        /// Requested frequency in Hz
        frequency: f64,
        /// Highest valid frequency in Hz
        nyquist: f64,
    },

    /// Row/sample count outside `(0, available)`
    SampleCountOutOfRange {
        /// Requested count
        requested: usize,
        /// Rows currently held by the buffer
        available: usize,
    },

    /// Band bounds violate `0 < from <= to < nyquist`
    InvalidBand {
        /// Lower edge in Hz
        from: f64,
        /// Upper edge in Hz
        to: f64,
        /// Nyquist frequency in Hz
        nyquist: f64,
    },

    /// Snapshots with different key sets were combined
    SnapshotKeyMismatch {
        /// Number of keys on the reference snapshot
        expected: usize,
        /// Number of keys on the offending snapshot
        actual: usize,
        /// Position of the offending snapshot in the input
        index: usize,
    },

    /// Frequency or band never registered on a snapshot
    UnknownFrequency {
        /// Lower edge (equal to `to` for single frequencies)
        from: f64,
        /// Upper edge
        to: f64,
    },

    /// A single scheduled cycle failed; the schedule keeps running
    CycleFailed {
        /// What went wrong inside the tick
        reason: String,
    },

    /// Operation not valid in the current state (e.g. stop before start)
    InvalidState {
        /// Description of the state problem
        reason: &'static str,
    },

    /// Serialization/deserialization error
    Serialization {
        /// Serializer message
        reason: String,
    },
}

impl SpectraError {
    /// True for errors that only abandon the current cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, SpectraError::CycleFailed { .. })
    }
}

impl fmt::Display for SpectraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpectraError::InvalidConfig { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }
            SpectraError::FrequencyOutOfRange { frequency, nyquist } => {
                write!(f, "Frequency out of range: {}Hz, valid range: (0, {}]Hz",
                       frequency, nyquist)
            }
            SpectraError::SampleCountOutOfRange { requested, available } => {
                write!(f, "Sample count out of range: requested {}, valid range: (0, {})",
                       requested, available)
            }
            SpectraError::InvalidBand { from, to, nyquist } => {
                write!(f, "Invalid band [{}, {}]Hz: bounds must satisfy 0 < from <= to < {}Hz",
                       from, to, nyquist)
            }
            SpectraError::SnapshotKeyMismatch { expected, actual, index } => {
                write!(f, "Snapshot key mismatch at index {}: expected {} keys, found {} (or different keys)",
                       index, expected, actual)
            }
            SpectraError::UnknownFrequency { from, to } => {
                if from == to {
                    write!(f, "Frequency {}Hz is not registered on this snapshot", from)
                } else {
                    write!(f, "Band [{}, {}]Hz is not registered on this snapshot", from, to)
                }
            }
            SpectraError::CycleFailed { reason } => {
                write!(f, "Cycle failed: {}", reason)
            }
            SpectraError::InvalidState { reason } => {
                write!(f, "Invalid state: {}", reason)
            }
            SpectraError::Serialization { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for SpectraError {}

impl From<serde_json::Error> for SpectraError {
    fn from(e: serde_json::Error) -> Self {
        SpectraError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)+) => {
        $crate::error::SpectraError::InvalidConfig {
            reason: format!($($arg)+),
        }
    };
}

/// Convenience macro for creating cycle errors
#[macro_export]
macro_rules! cycle_error {
    ($($arg:tt)+) => {
        $crate::error::SpectraError::CycleFailed {
            reason: format!($($arg)+),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SpectraError::FrequencyOutOfRange {
            frequency: 300.0,
            nyquist: 128.0,
        };
        let display = format!("{}", error);
        assert!(display.contains("Frequency out of range"));
        assert!(display.contains("300"));
        assert!(display.contains("128"));
    }

    #[test]
    fn test_error_equality() {
        let error1 = config_error!("sample size {} is not a power of two", 100);
        let error2 = SpectraError::InvalidConfig {
            reason: "sample size 100 is not a power of two".to_string(),
        };
        assert_eq!(error1, error2);
    }

    #[test]
    fn test_json_error_converts() {
        fn parse(text: &str) -> SpectraResult<serde_json::Value> {
            Ok(serde_json::from_str(text)?)
        }
        assert!(matches!(parse("{ broken"), Err(SpectraError::Serialization { .. })));
        assert!(parse("{}").is_ok());
    }

    #[test]
    fn test_transient_classification() {
        assert!(cycle_error!("boom").is_transient());
        assert!(!config_error!("bad").is_transient());
    }
}
