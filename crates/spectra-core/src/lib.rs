//! Spectra-Core: Foundation types for the band-power pipeline
//!
//! Errors, configuration, raw samples and per-cycle power snapshots shared by
//! the processing and runtime crates.

pub mod error;
pub mod config;
pub mod sample;
pub mod snapshot;
pub mod time;

pub use config::{BufferMode, DspConfig, FrequencyBand, PassFilter, Smoothing, WindowFunction};
pub use error::{SpectraError, SpectraResult};
pub use sample::{RawSample, SampleRow};
pub use snapshot::{BandPower, PowerSnapshot, PowerSnapshotBuilder};
