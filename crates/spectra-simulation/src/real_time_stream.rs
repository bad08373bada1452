//! Real-time EEG streaming paced by the wall clock
//!
//! Every tick generates the rows whose capture time has come due and
//! broadcasts them as one [`SampleChunk`]. Capture times track
//! [`unix_nanos`], so chunks can be fed straight into a time-keyed pipeline.

use crate::eeg_simulator::{EegConfig, EegSimulator};
use crate::signal_patterns::RhythmPattern;
use serde::{Deserialize, Serialize};
use spectra_core::time::{unix_nanos, NANOS_PER_MILLI};
use spectra_core::{config_error, SampleRow, SpectraError, SpectraResult};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for real-time streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub eeg: EegConfig,
    /// Chunk cadence in Hz
    pub update_rate: f64,
    /// Chunks a lagging subscriber may fall behind before losing data
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            eeg: EegConfig::default(),
            update_rate: 50.0,
            buffer_size: 64,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> SpectraResult<()> {
        self.eeg.validate()?;
        if !self.update_rate.is_finite() || self.update_rate <= 0.0 {
            return Err(config_error!("stream update rate must be positive, got {}", self.update_rate));
        }
        if self.buffer_size == 0 {
            return Err(config_error!("stream buffer size must be positive"));
        }
        Ok(())
    }

    fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.update_rate)
    }
}

/// Rows generated during one tick
#[derive(Debug, Clone)]
pub struct SampleChunk {
    pub sequence: u64,
    pub rows: Arc<Vec<SampleRow>>,
}

impl SampleChunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Commands for controlling the stream
#[derive(Debug, Clone)]
pub enum StreamCommand {
    /// Start from signal time zero, anchored at the current time
    Start,
    /// Stop and reset signal time
    Stop,
    /// Stop emitting; signal time is kept
    Pause,
    /// Continue after a pause, anchored at the current time
    Resume,
    UpdateConfig(StreamConfig),
    UpdatePattern(RhythmPattern),
}

/// Stream statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub is_running: bool,
    pub chunks_generated: u64,
    pub rows_generated: u64,
    /// Seconds of signal generated since the last start
    pub total_duration: f64,
    /// Mean generation time per chunk, microseconds
    pub average_chunk_time_us: f64,
    /// Wall-clock millis of the last chunk
    pub last_update: u64,
}

/// Real-time EEG signal stream
#[derive(Debug)]
pub struct RealTimeEegStream {
    config: StreamConfig,
    simulator: EegSimulator,
    data_sender: broadcast::Sender<SampleChunk>,
    control_receiver: mpsc::Receiver<StreamCommand>,
    control_sender: mpsc::Sender<StreamCommand>,
    stats: Arc<Mutex<StreamStats>>,
    running: bool,
    sequence: u64,
}

impl RealTimeEegStream {
    pub fn new(config: StreamConfig) -> SpectraResult<Self> {
        config.validate()?;
        let simulator = EegSimulator::new(config.eeg.clone())?;
        let (data_sender, _) = broadcast::channel(config.buffer_size);
        let (control_sender, control_receiver) = mpsc::channel(32);

        Ok(RealTimeEegStream {
            config,
            simulator,
            data_sender,
            control_receiver,
            control_sender,
            stats: Arc::new(Mutex::new(StreamStats::default())),
            running: false,
            sequence: 0,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SampleChunk> {
        self.data_sender.subscribe()
    }

    pub fn control_handle(&self) -> mpsc::Sender<StreamCommand> {
        self.control_sender.clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Drive the stream until every control sender is dropped
    pub async fn run(mut self) -> SpectraResult<()> {
        // the stream must not keep its own control channel open
        let (detached, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.control_sender, detached));

        let mut ticker = interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            update_rate = self.config.update_rate,
            sample_rate = self.config.eeg.sample_rate,
            "EEG stream ready"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.running {
                        self.emit_chunk().await;
                    }
                }
                command = self.control_receiver.recv() => {
                    match command {
                        Some(command) => {
                            if let Some(period) = self.handle_command(command).await {
                                ticker = interval(period);
                                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            }
                        }
                        None => {
                            debug!("EEG stream control channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.stats.lock().await.is_running = false;
        info!("EEG stream finished");
        Ok(())
    }

    async fn emit_chunk(&mut self) {
        let started = Instant::now();
        let rows = self.simulator.generate_until(unix_nanos());
        let elapsed = started.elapsed();
        if rows.is_empty() {
            return;
        }

        let chunk = SampleChunk {
            sequence: self.sequence,
            rows: Arc::new(rows),
        };
        self.sequence += 1;

        {
            let mut stats = self.stats.lock().await;
            let previous = stats.chunks_generated as f64;
            stats.chunks_generated += 1;
            stats.rows_generated += chunk.len() as u64;
            stats.total_duration = self.simulator.samples_generated() as f64 / self.config.eeg.sample_rate;
            stats.average_chunk_time_us = (stats.average_chunk_time_us * previous
                + elapsed.as_secs_f64() * 1e6)
                / stats.chunks_generated as f64;
            stats.last_update = (unix_nanos() / NANOS_PER_MILLI) as u64;
        }

        if elapsed > self.config.tick_period() {
            warn!(
                elapsed_ms = elapsed.as_secs_f64() * 1e3,
                "chunk generation slower than the tick period"
            );
        }
        // no subscribers is fine
        let _ = self.data_sender.send(chunk);
    }

    /// Apply a command; returns the new tick period when it changed
    async fn handle_command(&mut self, command: StreamCommand) -> Option<Duration> {
        match command {
            StreamCommand::Start => {
                self.simulator.restart_at(unix_nanos());
                self.set_running(true).await;
                info!("EEG stream started");
            }
            StreamCommand::Stop => {
                self.set_running(false).await;
                self.simulator.restart_at(unix_nanos());
                let mut stats = self.stats.lock().await;
                stats.chunks_generated = 0;
                stats.rows_generated = 0;
                stats.total_duration = 0.0;
                info!("EEG stream stopped");
            }
            StreamCommand::Pause => {
                self.set_running(false).await;
                info!("EEG stream paused");
            }
            StreamCommand::Resume => {
                self.simulator.reanchor(unix_nanos());
                self.set_running(true).await;
                info!("EEG stream resumed");
            }
            StreamCommand::UpdateConfig(config) => {
                let result = config
                    .validate()
                    .and_then(|_| self.simulator.update_config(config.eeg.clone()));
                match result {
                    Ok(()) => {
                        let period_changed = config.update_rate != self.config.update_rate;
                        self.config = config;
                        info!("EEG stream configuration updated");
                        if period_changed {
                            return Some(self.config.tick_period());
                        }
                    }
                    Err(e) => warn!(error = %e, "EEG stream configuration rejected"),
                }
            }
            StreamCommand::UpdatePattern(pattern) => {
                info!(pattern = pattern.description(), "EEG stream pattern updated");
                self.config.eeg.pattern = pattern.clone();
                self.simulator.set_pattern(pattern);
            }
        }
        None
    }

    async fn set_running(&mut self, running: bool) {
        self.running = running;
        self.stats.lock().await.is_running = running;
    }
}

/// Handle to a stream running in a background task
#[derive(Debug)]
pub struct StreamHandle {
    control: mpsc::Sender<StreamCommand>,
    data: broadcast::Sender<SampleChunk>,
    stats: Arc<Mutex<StreamStats>>,
    task: JoinHandle<SpectraResult<()>>,
}

impl StreamHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SampleChunk> {
        self.data.subscribe()
    }

    pub async fn send(&self, command: StreamCommand) -> SpectraResult<()> {
        self.control.send(command).await.map_err(|_| SpectraError::InvalidState {
            reason: "EEG stream task has exited",
        })
    }

    pub fn control_handle(&self) -> mpsc::Sender<StreamCommand> {
        self.control.clone()
    }

    pub async fn stats(&self) -> StreamStats {
        self.stats.lock().await.clone()
    }

    /// Close the control channel and wait for the task to finish
    pub async fn shutdown(self) -> SpectraResult<()> {
        drop(self.control);
        self.task.await.map_err(|e| SpectraError::CycleFailed {
            reason: format!("EEG stream task failed: {}", e),
        })?
    }
}

/// Create a stream and run it in the background
pub fn start_eeg_stream(config: StreamConfig) -> SpectraResult<StreamHandle> {
    let stream = RealTimeEegStream::new(config)?;
    let control = stream.control_handle();
    let data = stream.data_sender.clone();
    let stats = Arc::clone(&stream.stats);

    let task = tokio::spawn(async move {
        let result = stream.run().await;
        if let Err(e) = &result {
            warn!(error = %e, "EEG stream error");
        }
        result
    });

    Ok(StreamHandle {
        control,
        data,
        stats,
        task,
    })
}
