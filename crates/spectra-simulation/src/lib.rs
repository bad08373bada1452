//! Spectra-Simulation: synthetic EEG generation and streaming
//!
//! Seeded rhythm mixtures with noise, mains interference and capture-time
//! jitter, for testing and demos without a device.

pub mod eeg_simulator;
pub mod real_time_stream;
pub mod signal_patterns;

pub use eeg_simulator::{EegConfig, EegSimulator, NoiseConfig};
pub use real_time_stream::{
    start_eeg_stream, RealTimeEegStream, SampleChunk, StreamCommand, StreamConfig, StreamHandle, StreamStats,
};
pub use signal_patterns::{Rhythm, RhythmPattern};
