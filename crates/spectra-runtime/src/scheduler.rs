//! Fixed-rate cycle scheduler
//!
//! A timing thread sleeps until each deadline (whole milliseconds on the
//! shutdown channel, then the sub-millisecond rest) and fires a tick into a
//! one-slot queue. A worker thread runs the job for every tick it receives.
//! A tick fired while the slot is still occupied is coalesced, so ticks never
//! overlap and an overrun is followed immediately by the next tick.
//!
//! Panics and errors inside a tick are contained: the tick is abandoned, the
//! failure logged, the schedule continues.

use crate::stats::{CycleStats, StatsRecorder, TickResult};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use spectra_core::time::{period_nanos, SleepSplit};
use spectra_core::{SpectraError, SpectraResult};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Number of periods to wait before the first tick
pub const WARM_UP_PERIODS: u32 = 4;

/// What a tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// No usable frame this time
    Stale,
}

/// Work performed on every tick
pub trait CycleJob: Send + Sync + 'static {
    /// Run one cycle
    fn run_cycle(&self) -> SpectraResult<CycleOutcome>;

    /// Period until the next tick, read again after every tick
    fn period(&self) -> Duration;
}

struct Running {
    shutdown: Sender<()>,
    active: Arc<AtomicBool>,
    timer: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Drives a [`CycleJob`] at the job's period on dedicated threads
pub struct CycleScheduler {
    job: Arc<dyn CycleJob>,
    stats: Arc<StatsRecorder>,
    running: Option<Running>,
    /// Worker that asked for its own stop; joined once another thread can
    lingering: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleScheduler")
            .field("running", &self.running.is_some())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl CycleScheduler {
    pub fn new(job: Arc<dyn CycleJob>) -> Self {
        Self::with_stats(job, Arc::new(StatsRecorder::new()))
    }

    pub fn with_stats(job: Arc<dyn CycleJob>, stats: Arc<StatsRecorder>) -> Self {
        Self {
            job,
            stats,
            running: None,
            lingering: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn stats(&self) -> CycleStats {
        self.stats.snapshot()
    }

    /// Spawn the timing and worker threads; first tick after the warm-up
    pub fn start(&mut self) -> SpectraResult<()> {
        if self.running.is_some() {
            return Err(SpectraError::InvalidState {
                reason: "scheduler already running",
            });
        }
        self.join_lingering();

        let (tick_tx, tick_rx) = bounded::<u64>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let active = Arc::new(AtomicBool::new(true));

        let timer = {
            let job = Arc::clone(&self.job);
            let stats = Arc::clone(&self.stats);
            thread::Builder::new()
                .name("spectra-timer".into())
                .spawn(move || timer_loop(job, stats, tick_tx, shutdown_rx))
                .map_err(|e| SpectraError::CycleFailed {
                    reason: format!("failed to spawn timer thread: {}", e),
                })?
        };

        let worker = {
            let job = Arc::clone(&self.job);
            let stats = Arc::clone(&self.stats);
            let active = Arc::clone(&active);
            let spawned = thread::Builder::new()
                .name("spectra-worker".into())
                .spawn(move || worker_loop(job, stats, tick_rx, active));
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    drop(shutdown_tx);
                    let _ = timer.join();
                    return Err(SpectraError::CycleFailed {
                        reason: format!("failed to spawn worker thread: {}", e),
                    });
                }
            }
        };

        self.stats.set_running(true);
        self.running = Some(Running {
            shutdown: shutdown_tx,
            active,
            timer,
            worker,
        });
        info!(period_ms = self.job.period().as_secs_f64() * 1e3, "cycle scheduler started");
        Ok(())
    }

    /// Stop ticking, let the in-flight tick finish and join both threads
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.active.store(false, Ordering::Release);
        // disconnecting wakes the timer out of its sleep
        drop(running.shutdown);
        if running.timer.join().is_err() {
            warn!("timer thread panicked");
        }
        if running.worker.thread().id() == thread::current().id() {
            // stopped from inside a tick: the worker exits once the tick returns
            debug!("stop requested by the worker, join deferred");
            self.lingering = Some(running.worker);
        } else if running.worker.join().is_err() {
            warn!("worker thread panicked");
        }
        self.join_lingering();
        self.stats.set_running(false);
        info!("cycle scheduler stopped");
    }

    fn join_lingering(&mut self) {
        let Some(worker) = self.lingering.take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            self.lingering = Some(worker);
        } else if worker.join().is_err() {
            warn!("worker thread panicked");
        }
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        self.stop();
        self.join_lingering();
    }
}

fn timer_loop(
    job: Arc<dyn CycleJob>,
    stats: Arc<StatsRecorder>,
    ticks: Sender<u64>,
    shutdown: Receiver<()>,
) {
    let origin = Instant::now();
    let now_nanos = || origin.elapsed().as_nanos() as i64;
    let mut period = period_nanos(job.period());
    let mut deadline = period * WARM_UP_PERIODS as i64;
    let mut sequence: u64 = 0;

    loop {
        let split = SleepSplit::until(now_nanos(), deadline);
        if split.millis > 0 {
            match shutdown.recv_timeout(split.millis_duration()) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
        } else if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }
        let rest = SleepSplit::until(now_nanos(), deadline);
        if rest.millis == 0 && rest.sub_millis_nanos > 0 {
            thread::sleep(rest.remainder_duration());
        }

        stats.record_fired();
        match ticks.try_send(sequence) {
            Ok(()) => trace!(sequence, "tick fired"),
            Err(TrySendError::Full(_)) => {
                stats.record_coalesced();
                debug!(sequence, "worker busy, tick coalesced");
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
        sequence += 1;

        period = period_nanos(job.period());
        deadline += period;
        let now = now_nanos();
        if deadline + period < now {
            // far behind: resume from now instead of firing a burst
            deadline = now;
        }
    }
    debug!("timer thread exiting");
}

fn worker_loop(
    job: Arc<dyn CycleJob>,
    stats: Arc<StatsRecorder>,
    ticks: Receiver<u64>,
    active: Arc<AtomicBool>,
) {
    for sequence in ticks.iter() {
        if !active.load(Ordering::Acquire) {
            break;
        }
        let started = Instant::now();
        let result = match catch_unwind(AssertUnwindSafe(|| job.run_cycle())) {
            Ok(Ok(CycleOutcome::Completed)) => TickResult::Completed,
            Ok(Ok(CycleOutcome::Stale)) => TickResult::Stale,
            Ok(Err(e)) => {
                warn!(sequence, error = %e, "cycle failed");
                TickResult::Failed
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(sequence, %reason, "cycle panicked");
                TickResult::Failed
            }
        };
        let latency = started.elapsed();
        stats.record_tick(result, latency);
        trace!(sequence, latency_us = latency.as_micros() as u64, "tick finished");
    }
    debug!("worker thread exiting");
}
