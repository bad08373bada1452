//! Spectra Monitor - band-power pipeline fed by the synthetic EEG stream
//!
//! Signal flow: EEG simulator → sample ingress → band-power pipeline → log.
//! Set `SPECTRA_CONFIG` to a JSON file to override the defaults and
//! `RUST_LOG` to change verbosity.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spectra_core::{DspConfig, FrequencyBand, PowerSnapshot};
use spectra_runtime::{ConnectionState, PipelineListener, SampleIngress, SpectraPipeline};
use spectra_simulation::{start_eeg_stream, StreamCommand, StreamConfig};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Everything the monitor can be configured with
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct MonitorConfig {
    pipeline: DspConfig,
    stream: StreamConfig,
    /// Stop after this many seconds; runs until Ctrl-C when unset
    run_seconds: Option<f64>,
    /// Calculate the baseline over this many seconds after start
    baseline_seconds: Option<f64>,
    /// Rows the ingress queue holds before dropping the oldest
    ingress_capacity: usize,
    /// Log a band summary every this many cycles
    log_every: u64,
}

impl MonitorConfig {
    fn load() -> Result<Self> {
        let mut config = match std::env::var_os("SPECTRA_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if config.ingress_capacity == 0 {
            config.ingress_capacity = 4096;
        }
        if config.log_every == 0 {
            config.log_every = 10;
        }
        config.pipeline.validate().context("invalid pipeline configuration")?;
        config.stream.validate().context("invalid stream configuration")?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Logs a summary of every `every`-th cycle
struct LoggingListener {
    bands: Vec<FrequencyBand>,
    every: u64,
    cycles: AtomicU64,
}

impl LoggingListener {
    fn label(&self, from: f64, to: f64) -> String {
        self.bands
            .iter()
            .find(|b| b.from == from && b.to == to)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| format!("{}-{}Hz", from, to))
    }
}

impl PipelineListener for LoggingListener {
    fn on_cycle_completed(&self, snapshot: &PowerSnapshot) {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        if cycle % self.every != 0 {
            return;
        }

        let bands: Vec<String> = snapshot
            .entries()
            .iter()
            .filter(|e| !e.is_point())
            .map(|e| format!("{}={:.3}", self.label(e.from_frequency, e.to_frequency), e.power))
            .collect();
        let dominant = snapshot
            .entries()
            .iter()
            .filter(|e| !e.is_point())
            .max_by(|a, b| a.power.total_cmp(&b.power))
            .map(|e| self.label(e.from_frequency, e.to_frequency));

        info!(cycle, dominant = ?dominant, bands = %bands.join(" "), "band power");
        for point in snapshot.entries().iter().filter(|e| e.is_point()) {
            debug!(cycle, frequency = point.from_frequency, power = point.power, "point power");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = MonitorConfig::load()?;
    info!(
        sample_rate = config.pipeline.sample_rate(),
        sample_size = config.pipeline.sample_size(),
        cycles_per_second = config.pipeline.cycles_per_second(),
        pattern = config.stream.eeg.pattern.description(),
        "starting spectra monitor"
    );

    let pipeline = Arc::new(SpectraPipeline::new(config.pipeline.clone())?);
    pipeline.add_listener(Arc::new(LoggingListener {
        bands: config.pipeline.bands().to_vec(),
        every: config.log_every,
        cycles: AtomicU64::new(0),
    }));
    let mut ingress = SampleIngress::spawn(Arc::clone(&pipeline), config.ingress_capacity)?;

    let stream = start_eeg_stream(config.stream.clone())?;
    let forwarder = {
        let mut chunks = stream.subscribe();
        let sender = ingress.sender();
        tokio::spawn(async move {
            loop {
                match chunks.recv().await {
                    Ok(chunk) => {
                        for row in chunk.rows.iter() {
                            sender.send(row.clone());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "forwarder lagged behind the stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    pipeline.on_connection_state_changed(ConnectionState::Started)?;
    stream.send(StreamCommand::Start).await?;

    if let Some(seconds) = config.baseline_seconds {
        pipeline.calculate_baseline();
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
            match pipeline.stop_calculate_baseline() {
                Ok(baseline) => info!(baseline, "baseline fixed"),
                Err(e) => warn!(error = %e, "baseline calculation failed"),
            }
        });
    }

    match config.run_seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
            info!("interrupted");
        }
    }

    stream.send(StreamCommand::Stop).await?;
    pipeline.on_connection_state_changed(ConnectionState::Stopped)?;
    let stream_stats = stream.stats().await;
    stream.shutdown().await?;
    forwarder.abort();
    let delivered = ingress.shutdown();

    info!(
        delivered,
        stream = %serde_json::to_string(&stream_stats)?,
        cycles = %serde_json::to_string(&pipeline.stats())?,
        "spectra monitor finished"
    );
    Ok(())
}
