//! Spectra-Processing: buffering, framing and spectral analysis
//!
//! Samples land in a bounded buffer, a [`FrameBuilder`] cuts one second of
//! evenly spaced values, a [`SpectralAnalyzer`] turns it into band powers and
//! the [`BandAggregator`] smooths them over time.

pub mod aggregator;
pub mod analyzer;
pub mod buffer;
pub mod filters;
pub mod frame;
pub mod spectrum;
pub mod window;

pub use aggregator::{recency_weighted_rms, weighted_moving_average, BandAggregator};
pub use analyzer::{snapshot_for_frame, FftAnalyzer, SpectralAnalyzer};
pub use buffer::{CircularSampleBuffer, TimeKeyedBuffer};
pub use filters::{Biquad, FilterCache, FilterChain};
pub use frame::{Frame, FrameBuilder};
pub use spectrum::Spectrum;
