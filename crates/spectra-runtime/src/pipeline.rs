//! Pipeline facade wiring buffers, analysis, aggregation and scheduling
//!
//! Producers call [`SpectraPipeline::deliver_sample`] or
//! [`SpectraPipeline::deliver_row`] from any thread. Connection lifecycle
//! events start and stop the cycle scheduler. Every tick builds a frame,
//! analyses it, smooths the result and notifies the listeners.

use crate::channel::BoundedReceiver;
use crate::config::ConfigHandle;
use crate::gate::StartGate;
use crate::listener::{ChannelListener, ListenerId, ListenerRegistry, PipelineEvent, PipelineListener};
use crate::scheduler::{CycleJob, CycleOutcome, CycleScheduler};
use crate::stats::{CycleStats, StatsRecorder};
use parking_lot::Mutex;
use spectra_core::time::unix_nanos;
use spectra_core::{BufferMode, DspConfig, PowerSnapshot, SpectraError, SpectraResult};
use spectra_processing::{
    snapshot_for_frame, BandAggregator, CircularSampleBuffer, FftAnalyzer, Frame, FrameBuilder,
    SpectralAnalyzer, TimeKeyedBuffer,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Connection lifecycle reported by the device layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Started,
    Stopped,
}

/// Everything one tick needs, shared between the facade and the worker
struct PipelineCore {
    config: ConfigHandle,
    analyzer: Arc<dyn SpectralAnalyzer>,
    circular: Mutex<Arc<CircularSampleBuffer>>,
    time_keyed: TimeKeyedBuffer,
    aggregator: Mutex<BandAggregator>,
    /// Configuration the analyzer and aggregator were last synced to
    applied: Mutex<DspConfig>,
    listeners: ListenerRegistry,
}

impl PipelineCore {
    /// Push configuration changes into the stateful stages
    fn sync_config(&self) -> SpectraResult<DspConfig> {
        let config = self.config.current();
        let mut applied = self.applied.lock();
        if *applied == config {
            return Ok(config);
        }

        self.analyzer.reconfigure(&config)?;
        {
            let mut aggregator = self.aggregator.lock();
            aggregator.reconfigure(&config);
            if applied.frequencies() != config.frequencies() || applied.bands() != config.bands() {
                aggregator.clear_history();
                debug!("output keys changed, smoothing history cleared");
            }
        }
        if applied.num_channels() != config.num_channels() {
            let capacity = self.circular.lock().capacity();
            *self.circular.lock() = Arc::new(CircularSampleBuffer::new(capacity, config.num_channels())?);
            info!(channels = config.num_channels(), "circular buffer reshaped");
        }
        if applied.sample_rate() != config.sample_rate() {
            let circular = self.circular();
            // a running tune sets the capacity itself when it stops
            if !circular.is_tuning() {
                let capacity = one_second_capacity(&config);
                circular.resize(capacity);
                info!(capacity, sample_rate = config.sample_rate(), "circular buffer resized");
            }
        }
        *applied = config.clone();
        Ok(config)
    }

    fn circular(&self) -> Arc<CircularSampleBuffer> {
        Arc::clone(&self.circular.lock())
    }

    fn build_frame(&self, config: &DspConfig, reference_nanos: i64) -> SpectraResult<Option<Frame>> {
        let builder = FrameBuilder::from_config(config);
        match config.buffer_mode() {
            BufferMode::TimeKeyed => Ok(builder.from_time_keyed(&self.time_keyed, reference_nanos)),
            BufferMode::Circular => builder
                .from_circular(
                    &self.circular(),
                    config.channel_index(),
                    config.samples_per_cycle(),
                    reference_nanos,
                )
                .map(Some),
        }
    }

    fn cycle_at(&self, reference_nanos: i64) -> SpectraResult<CycleOutcome> {
        let config = self.sync_config()?;
        let Some(frame) = self.build_frame(&config, reference_nanos)? else {
            return Ok(CycleOutcome::Stale);
        };

        let raw = snapshot_for_frame(self.analyzer.as_ref(), &frame, &config)?;
        self.listeners.notify_frame(&frame);
        let smoothed = self.aggregator.lock().push(raw)?;
        self.listeners.notify_cycle(&smoothed);
        trace!(entries = smoothed.len(), "cycle completed");
        Ok(CycleOutcome::Completed)
    }
}

impl CycleJob for PipelineCore {
    fn run_cycle(&self) -> SpectraResult<CycleOutcome> {
        self.cycle_at(unix_nanos())
    }

    fn period(&self) -> Duration {
        self.config.read(|c| c.cycle_period())
    }
}

/// Circular buffer rows holding one second at the configured rate
fn one_second_capacity(config: &DspConfig) -> usize {
    config.sample_rate().round().max(1.0) as usize
}

/// Real-time band-power pipeline
pub struct SpectraPipeline {
    core: Arc<PipelineCore>,
    scheduler: Mutex<CycleScheduler>,
    stats: Arc<StatsRecorder>,
    gate: Arc<StartGate>,
    state: Mutex<ConnectionState>,
}

impl std::fmt::Debug for SpectraPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectraPipeline")
            .field("state", &*self.state.lock())
            .field("analyzer", &self.core.analyzer.name())
            .field("listeners", &self.core.listeners.len())
            .finish()
    }
}

impl SpectraPipeline {
    /// Pipeline with the stock FFT analyzer
    pub fn new(config: DspConfig) -> SpectraResult<Self> {
        let analyzer = Arc::new(FftAnalyzer::new(&config));
        Self::with_analyzer(config, analyzer)
    }

    /// Pipeline with a custom analyzer
    pub fn with_analyzer(config: DspConfig, analyzer: Arc<dyn SpectralAnalyzer>) -> SpectraResult<Self> {
        let handle = ConfigHandle::new(config.clone())?;
        analyzer.reconfigure(&config)?;

        let capacity = one_second_capacity(&config);
        let core = Arc::new(PipelineCore {
            config: handle,
            analyzer,
            circular: Mutex::new(Arc::new(CircularSampleBuffer::new(capacity, config.num_channels())?)),
            time_keyed: TimeKeyedBuffer::new(),
            aggregator: Mutex::new(BandAggregator::new(&config)),
            applied: Mutex::new(config),
            listeners: ListenerRegistry::new(),
        });
        let stats = Arc::new(StatsRecorder::new());
        let job: Arc<dyn CycleJob> = core.clone();
        let scheduler = CycleScheduler::with_stats(job, Arc::clone(&stats));

        Ok(Self {
            core,
            scheduler: Mutex::new(scheduler),
            stats,
            gate: Arc::new(StartGate::new()),
            state: Mutex::new(ConnectionState::Stopped),
        })
    }

    /// Single-channel sample; ignored by the time-keyed buffer while stopped
    pub fn deliver_sample(&self, capture_time_nanos: i64, value: f64) -> SpectraResult<()> {
        self.deliver_row(capture_time_nanos, &[value])
    }

    /// One value per channel sharing a capture time
    pub fn deliver_row(&self, capture_time_nanos: i64, row: &[f64]) -> SpectraResult<()> {
        let (mode, channel) = self.core.config.read(|c| (c.buffer_mode(), c.channel_index()));
        match mode {
            BufferMode::TimeKeyed => {
                let value = row.get(channel).copied().ok_or_else(|| SpectraError::InvalidConfig {
                    reason: format!("row of {} values has no channel {}", row.len(), channel),
                })?;
                self.core.time_keyed.add_signal(capture_time_nanos, value);
                Ok(())
            }
            BufferMode::Circular => self.core.circular().add_row(row),
        }
    }

    /// React to the device connection starting or stopping
    pub fn on_connection_state_changed(&self, state: ConnectionState) -> SpectraResult<()> {
        let mut current = self.state.lock();
        if *current == state {
            return Ok(());
        }
        match state {
            ConnectionState::Started => {
                self.core.time_keyed.start();
                self.scheduler.lock().start()?;
                self.gate.open();
                info!("pipeline started");
            }
            ConnectionState::Stopped => {
                *current = state;
                self.gate.close();
                self.scheduler.lock().stop();
                self.core.time_keyed.stop();
                self.core.time_keyed.clear();
                info!("pipeline stopped");
            }
        }
        *current = state;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Frame for `reference_nanos` without analysing it
    pub fn process_signal(&self, reference_nanos: i64) -> SpectraResult<Option<Frame>> {
        let config = self.core.sync_config()?;
        self.core.build_frame(&config, reference_nanos)
    }

    /// Run one full cycle now, outside the schedule
    pub fn run_cycle(&self, reference_nanos: i64) -> SpectraResult<CycleOutcome> {
        self.core.cycle_at(reference_nanos)
    }

    /// Validated configuration change
    ///
    /// Buffers are reshaped before returning so samples delivered afterwards
    /// land in a buffer sized for the new rate; the next tick analyses with
    /// the new settings.
    pub fn update_config<F>(&self, change: F) -> SpectraResult<()>
    where
        F: FnOnce(&mut DspConfig) -> SpectraResult<()>,
    {
        self.core.config.update(change)?;
        self.core.sync_config().map(|_| ())
    }

    pub fn config(&self) -> DspConfig {
        self.core.config.current()
    }

    pub fn config_handle(&self) -> ConfigHandle {
        self.core.config.clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn PipelineListener>) -> ListenerId {
        self.core.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id)
    }

    /// Register a [`ChannelListener`] gated on this pipeline's start state
    pub fn subscribe(&self, capacity: usize, with_frames: bool) -> (ListenerId, BoundedReceiver<PipelineEvent>) {
        let (listener, receiver) = ChannelListener::new(capacity, Arc::clone(&self.gate), Duration::from_millis(50));
        let listener = if with_frames { listener.with_frames() } else { listener };
        (self.add_listener(Arc::new(listener)), receiver)
    }

    /// Start tracking the band minimum used as baseline
    pub fn calculate_baseline(&self) {
        self.core.aggregator.lock().calculate_baseline();
    }

    /// Freeze and apply the tracked baseline
    pub fn stop_calculate_baseline(&self) -> SpectraResult<f64> {
        self.core.aggregator.lock().stop_calculate_baseline()
    }

    pub fn reset_baseline(&self) {
        self.core.aggregator.lock().reset_baseline();
    }

    pub fn baseline(&self) -> f64 {
        self.core.aggregator.lock().baseline()
    }

    /// Measure the delivery rate of the circular buffer
    pub fn tune(&self) {
        self.core.circular().tune();
    }

    /// Finish measuring and resize to about one second; returns the rate
    pub fn stop_tuning(&self) -> SpectraResult<f64> {
        self.core.circular().stop_tuning()
    }

    /// Rows the circular buffer holds
    pub fn buffer_capacity(&self) -> usize {
        self.core.circular().capacity()
    }

    /// Entries currently held by the time-keyed buffer
    pub fn pending_samples(&self) -> usize {
        self.core.time_keyed.len()
    }

    pub fn stats(&self) -> CycleStats {
        self.stats.snapshot()
    }

    /// Unsmoothed snapshot for a frame, e.g. one from [`Self::process_signal`]
    pub fn analyze(&self, frame: &Frame) -> SpectraResult<PowerSnapshot> {
        let config = self.core.sync_config()?;
        snapshot_for_frame(self.core.analyzer.as_ref(), frame, &config)
    }
}

impl Drop for SpectraPipeline {
    fn drop(&mut self) {
        self.gate.close();
        self.scheduler.lock().stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectra_core::time::NANOS_PER_SECOND;

    const BASE: i64 = 1_700_000_000 * NANOS_PER_SECOND;

    fn feed_sine(pipeline: &SpectraPipeline, freq: f64, rate: usize, seconds: usize) -> i64 {
        let step = NANOS_PER_SECOND / rate as i64;
        let mut t = BASE;
        for i in 0..rate * seconds {
            let value = (2.0 * std::f64::consts::PI * freq * i as f64 / rate as f64).sin();
            pipeline.deliver_sample(t, value).unwrap();
            t += step;
        }
        t - step
    }

    #[test]
    fn test_stopped_pipeline_ignores_time_keyed_samples() {
        let pipeline = SpectraPipeline::new(DspConfig::default()).unwrap();
        pipeline.deliver_sample(BASE, 1.0).unwrap();
        assert_eq!(pipeline.pending_samples(), 0);
    }

    #[test]
    fn test_manual_cycle_notifies() {
        let pipeline = SpectraPipeline::new(DspConfig::default()).unwrap();
        pipeline.core.time_keyed.start();
        let (_, events) = pipeline.subscribe(8, true);
        pipeline.gate.open();

        let last = feed_sine(&pipeline, 10.0, 512, 2);
        assert_eq!(pipeline.run_cycle(last).unwrap(), CycleOutcome::Completed);

        let events = events.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PipelineEvent::FrameProcessed(_)));
        match &events[1] {
            PipelineEvent::CycleCompleted(snapshot) => {
                let alpha = snapshot.band(8.0, 13.0).unwrap();
                let beta = snapshot.band(13.0, 30.0).unwrap();
                assert!(alpha > beta);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_stale_cycle_skips_listeners() {
        let pipeline = SpectraPipeline::new(DspConfig::default()).unwrap();
        let (_, events) = pipeline.subscribe(8, true);
        pipeline.gate.open();
        assert_eq!(pipeline.run_cycle(BASE).unwrap(), CycleOutcome::Stale);
        assert!(events.is_empty());
    }

    #[test]
    fn test_circular_mode_and_channel_selection() {
        let mut config = DspConfig::default();
        config.set_num_channels(2).unwrap();
        config.set_channel_index(1).unwrap();
        config.set_buffer_mode(BufferMode::Circular).unwrap();
        let pipeline = SpectraPipeline::new(config).unwrap();
        assert_eq!(pipeline.buffer_capacity(), 256);

        for i in 0..256 {
            let t = i as f64 / 256.0;
            let row = [0.0, (2.0 * std::f64::consts::PI * 20.0 * t).sin()];
            pipeline.deliver_row(BASE + i, &row).unwrap();
        }
        assert!(pipeline.deliver_sample(BASE, 1.0).is_err());

        let frame = pipeline.process_signal(BASE).unwrap().unwrap();
        let snapshot = pipeline.analyze(&frame).unwrap();
        assert!(snapshot.band(13.0, 30.0).unwrap() > snapshot.band(1.0, 4.0).unwrap());
    }

    fn circular_pipeline() -> SpectraPipeline {
        let mut config = DspConfig::default();
        config.set_buffer_mode(BufferMode::Circular).unwrap();
        SpectraPipeline::new(config).unwrap()
    }

    fn circular_peak(pipeline: &SpectraPipeline) -> (f64, f64) {
        let frame = pipeline.process_signal(BASE).unwrap().unwrap();
        let spectrum = pipeline.core.analyzer.spectrum(&frame).unwrap();
        (spectrum.peak_frequency().unwrap(), spectrum.bin_width())
    }

    #[test]
    fn test_circular_rate_change_resizes_buffer() {
        let pipeline = circular_pipeline();
        feed_sine(&pipeline, 20.0, 256, 1);
        assert_eq!(circular_peak(&pipeline).0, 20.0);

        pipeline.update_config(|c| c.set_sample_rate(512.0)).unwrap();
        assert_eq!(pipeline.buffer_capacity(), 512);
        feed_sine(&pipeline, 20.0, 512, 1);
        assert_eq!(circular_peak(&pipeline).0, 20.0);
    }

    #[test]
    fn test_circular_rate_change_waits_for_tuning() {
        let pipeline = circular_pipeline();
        pipeline.tune();
        pipeline.update_config(|c| c.set_sample_rate(512.0)).unwrap();
        assert_eq!(pipeline.buffer_capacity(), 256);
    }

    #[test]
    fn test_samples_per_cycle_keeps_tone_frequency() {
        let pipeline = circular_pipeline();
        feed_sine(&pipeline, 20.0, 256, 1);

        pipeline.update_config(|c| c.set_samples_per_cycle(Some(100))).unwrap();
        let (peak, bin_width) = circular_peak(&pipeline);
        assert!((peak - 20.0).abs() <= bin_width, "peak {}", peak);
        let frame = pipeline.process_signal(BASE).unwrap().unwrap();
        let snapshot = pipeline.analyze(&frame).unwrap();
        assert!(snapshot.band(13.0, 30.0).unwrap() > snapshot.band(8.0, 13.0).unwrap());
    }

    #[test]
    fn test_key_change_clears_history() {
        let pipeline = SpectraPipeline::new(DspConfig::default()).unwrap();
        pipeline.core.time_keyed.start();
        let last = feed_sine(&pipeline, 10.0, 512, 2);
        pipeline.run_cycle(last).unwrap();

        pipeline.update_config(|c| c.set_frequencies(vec![10.0, 20.0])).unwrap();
        let last = feed_sine(&pipeline, 10.0, 512, 2);
        assert_eq!(pipeline.run_cycle(last).unwrap(), CycleOutcome::Completed);
    }

    #[test]
    fn test_invalid_update_keeps_running_config() {
        let pipeline = SpectraPipeline::new(DspConfig::default()).unwrap();
        assert!(pipeline.update_config(|c| c.set_sample_size(1000)).is_err());
        assert_eq!(pipeline.config().sample_size(), 256);
    }
}
