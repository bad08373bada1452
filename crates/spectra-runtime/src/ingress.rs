//! Decouples device I/O from buffer writes
//!
//! Device callbacks push [`SampleRow`]s into a drop-oldest channel and
//! return immediately; a dedicated thread drains the channel into the
//! pipeline in submission order.

use crate::channel::{bounded, BoundedSender, OverflowPolicy, SendOutcome};
use crate::pipeline::SpectraPipeline;
use crossbeam_channel::{select, Sender};
use spectra_core::{SampleRow, SpectraError, SpectraResult};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Producer handle; cheap to clone across device threads
#[derive(Debug, Clone)]
pub struct IngressSender {
    rows: BoundedSender<SampleRow>,
}

impl IngressSender {
    /// Queue a row without blocking
    pub fn send(&self, row: SampleRow) -> SendOutcome {
        self.rows.send(row)
    }

    pub fn send_sample(&self, capture_time_nanos: i64, value: f64) -> SendOutcome {
        self.send(SampleRow::new(capture_time_nanos, vec![value]))
    }

    /// Rows lost because the drain thread fell behind
    pub fn dropped(&self) -> u64 {
        self.rows.dropped()
    }
}

/// Drain thread feeding a [`SpectraPipeline`]
#[derive(Debug)]
pub struct SampleIngress {
    sender: IngressSender,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl SampleIngress {
    /// Spawn the drain thread with room for `capacity` queued rows
    pub fn spawn(pipeline: Arc<SpectraPipeline>, capacity: usize) -> SpectraResult<Self> {
        let (rows_tx, rows_rx) = bounded::<SampleRow>(capacity, OverflowPolicy::DropOldest);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("spectra-ingress".into())
            .spawn(move || {
                let mut delivered = 0u64;
                loop {
                    select! {
                        recv(rows_rx.as_crossbeam()) -> row => match row {
                            Ok(row) => {
                                match pipeline.deliver_row(row.capture_time_nanos, &row.values) {
                                    Ok(()) => delivered += 1,
                                    Err(e) => warn!(error = %e, "sample row rejected"),
                                }
                            }
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!(delivered, "ingress thread exiting");
                delivered
            })
            .map_err(|e| SpectraError::CycleFailed {
                reason: format!("failed to spawn ingress thread: {}", e),
            })?;

        info!(capacity, "sample ingress started");
        Ok(Self {
            sender: IngressSender { rows: rows_tx },
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> IngressSender {
        self.sender.clone()
    }

    /// Stop the drain thread; returns how many rows reached the pipeline
    pub fn shutdown(&mut self) -> u64 {
        drop(self.shutdown.take());
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(delivered)) => {
                info!(delivered, dropped = self.sender.dropped(), "sample ingress stopped");
                delivered
            }
            Some(Err(_)) => {
                warn!("ingress thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for SampleIngress {
    fn drop(&mut self) {
        self.shutdown();
    }
}
