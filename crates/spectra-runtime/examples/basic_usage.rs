//! Basic usage of the band-power pipeline
//!
//! Feeds two seconds of a synthetic alpha rhythm, runs one cycle by hand and
//! prints the resulting band powers.

use spectra_core::time::{unix_nanos, NANOS_PER_SECOND};
use spectra_core::{DspConfig, PassFilter, SpectraResult, WindowFunction};
use spectra_runtime::{ConnectionState, PipelineEvent, SpectraPipeline};

fn main() -> SpectraResult<()> {
    let mut config = DspConfig::new(512.0, 256)?;
    config.set_window_function(WindowFunction::Hann)?;
    config.set_pass_filter(PassFilter::HighPass)?;
    println!("configuration: {}", config.to_json()?);

    let pipeline = SpectraPipeline::new(config)?;
    let (_, events) = pipeline.subscribe(16, false);
    pipeline.on_connection_state_changed(ConnectionState::Started)?;

    let rate = 512;
    let step = NANOS_PER_SECOND / rate;
    let start = unix_nanos() - 2 * NANOS_PER_SECOND;
    for i in 0..2 * rate {
        let t = i as f64 / rate as f64;
        let value = 30.0 * (2.0 * std::f64::consts::PI * 10.0 * t).sin()
            + 8.0 * (2.0 * std::f64::consts::PI * 22.0 * t).sin();
        pipeline.deliver_sample(start + i * step, value)?;
    }

    let outcome = pipeline.run_cycle(start + (2 * rate - 1) * step)?;
    println!("cycle outcome: {:?}", outcome);

    for event in events.drain() {
        if let PipelineEvent::CycleCompleted(snapshot) = event {
            for entry in snapshot.entries() {
                if entry.is_point() {
                    println!("{:>6.1} Hz        {:.4}", entry.from_frequency, entry.power);
                } else {
                    println!(
                        "{:>6.1}-{:<5.1} Hz  {:.4}",
                        entry.from_frequency, entry.to_frequency, entry.power
                    );
                }
            }
        }
    }

    pipeline.on_connection_state_changed(ConnectionState::Stopped)?;
    Ok(())
}
