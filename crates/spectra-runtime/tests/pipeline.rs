use spectra_core::time::{unix_nanos, NANOS_PER_MILLI, NANOS_PER_SECOND};
use spectra_core::{DspConfig, PowerSnapshot};
use spectra_runtime::{ConnectionState, CycleOutcome, PipelineEvent, PipelineListener, SampleIngress, SpectraPipeline};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const RATE: i64 = 512;
const STEP: i64 = NANOS_PER_SECOND / RATE;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn value_at(t: i64, freq: f64) -> f64 {
    (2.0 * std::f64::consts::PI * freq * t as f64 / NANOS_PER_SECOND as f64).sin()
}

/// Deliver grid-aligned samples in `[from, to)`; returns the next grid point
fn feed(pipeline: &SpectraPipeline, from: i64, to: i64, freq: f64) -> i64 {
    let mut t = from - from.rem_euclid(STEP);
    while t < to {
        pipeline.deliver_sample(t, value_at(t, freq)).unwrap();
        t += STEP;
    }
    t
}

/// Real-time producer: one second of history first, then keeps up with the clock
fn spawn_producer(pipeline: Arc<SpectraPipeline>, freq: f64, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let now = unix_nanos();
        let mut next = feed(&pipeline, now - NANOS_PER_SECOND - 10 * NANOS_PER_MILLI, now, freq);
        while !stop.load(Ordering::Relaxed) {
            next = feed(&pipeline, next, unix_nanos() + 2 * NANOS_PER_MILLI, freq);
            thread::sleep(Duration::from_millis(1));
        }
    })
}

fn fast_config() -> DspConfig {
    let mut config = DspConfig::default();
    config.set_cycles_per_second(20.0).unwrap();
    config
}

/// Ticks stay inside the warm-up for the whole test, so only manual cycles run
fn manual_config() -> DspConfig {
    let mut config = DspConfig::default();
    config.set_cycles_per_second(0.2).unwrap();
    config
}

fn cycles(events: Vec<PipelineEvent>) -> Vec<PowerSnapshot> {
    events
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::CycleCompleted(snapshot) => Some(snapshot),
            PipelineEvent::FrameProcessed(_) => None,
        })
        .collect()
}

#[test]
fn scheduled_cycles_track_dominant_rhythm() {
    init_tracing();
    let pipeline = Arc::new(SpectraPipeline::new(fast_config()).unwrap());
    let (_, events) = pipeline.subscribe(256, false);
    pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let producer = spawn_producer(Arc::clone(&pipeline), 10.0, Arc::clone(&stop));
    thread::sleep(Duration::from_millis(900));
    pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();
    stop.store(true, Ordering::Relaxed);
    producer.join().unwrap();

    let snapshots = cycles(events.drain());
    assert!(snapshots.len() >= 3, "only {} cycles", snapshots.len());
    for snapshot in &snapshots {
        assert!(snapshot.band(8.0, 13.0).unwrap() > snapshot.band(13.0, 30.0).unwrap());
        assert!(snapshot.band(8.0, 13.0).unwrap() > snapshot.band(1.0, 4.0).unwrap());
    }
    // notifications keep tick order
    assert!(snapshots
        .windows(2)
        .all(|pair| pair[0].capture_time_nanos() < pair[1].capture_time_nanos()));

    let stats = pipeline.stats();
    assert!(!stats.is_running);
    assert!(stats.completed >= snapshots.len() as u64);
    assert_eq!(stats.failed, 0);
}

#[test]
fn stopped_pipeline_publishes_nothing() {
    init_tracing();
    let pipeline = Arc::new(SpectraPipeline::new(fast_config()).unwrap());
    let (_, events) = pipeline.subscribe(64, true);

    pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let producer = spawn_producer(Arc::clone(&pipeline), 10.0, Arc::clone(&stop));
    thread::sleep(Duration::from_millis(500));
    pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();
    events.drain();

    thread::sleep(Duration::from_millis(300));
    stop.store(true, Ordering::Relaxed);
    producer.join().unwrap();

    assert!(events.is_empty());
    assert_eq!(pipeline.state(), ConnectionState::Stopped);
}

#[test]
fn restart_resumes_cycles() {
    init_tracing();
    let pipeline = Arc::new(SpectraPipeline::new(fast_config()).unwrap());
    let (_, events) = pipeline.subscribe(256, false);

    for _ in 0..2 {
        pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();
        // a repeated lifecycle event is a no-op
        pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let producer = spawn_producer(Arc::clone(&pipeline), 20.0, Arc::clone(&stop));
        thread::sleep(Duration::from_millis(600));
        pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();
        stop.store(true, Ordering::Relaxed);
        producer.join().unwrap();

        let snapshots = cycles(events.drain());
        assert!(!snapshots.is_empty());
        assert!(snapshots
            .iter()
            .all(|s| s.band(13.0, 30.0).unwrap() > s.band(8.0, 13.0).unwrap()));
    }
}

#[derive(Default)]
struct CountingListener {
    cycles: AtomicUsize,
    frames: AtomicUsize,
}

impl PipelineListener for CountingListener {
    fn on_cycle_completed(&self, _snapshot: &PowerSnapshot) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
    }

    fn on_frame_processed(&self, frame: &spectra_processing::Frame) {
        assert_eq!(frame.len(), 256);
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn removed_listener_is_not_notified() {
    let pipeline = SpectraPipeline::new(manual_config()).unwrap();
    let kept = Arc::new(CountingListener::default());
    let removed = Arc::new(CountingListener::default());
    pipeline.add_listener(kept.clone());
    let id = pipeline.add_listener(removed.clone());

    pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();
    let now = unix_nanos();
    let end = feed(&pipeline, now - 3 * NANOS_PER_SECOND, now - 2 * NANOS_PER_SECOND, 10.0);
    assert_eq!(pipeline.run_cycle(end - STEP).unwrap(), CycleOutcome::Completed);

    assert!(pipeline.remove_listener(id));
    let end = feed(&pipeline, end, now - NANOS_PER_SECOND, 10.0);
    assert_eq!(pipeline.run_cycle(end - STEP).unwrap(), CycleOutcome::Completed);
    pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();

    assert_eq!(kept.cycles.load(Ordering::SeqCst), 2);
    assert_eq!(kept.frames.load(Ordering::SeqCst), 2);
    assert_eq!(removed.cycles.load(Ordering::SeqCst), 1);
}

#[test]
fn baseline_is_subtracted_after_calculation() {
    let mut config = manual_config();
    config.set_smoothing_window(1).unwrap();
    let pipeline = SpectraPipeline::new(config).unwrap();
    let listener = Arc::new(CountingListener::default());
    pipeline.add_listener(listener.clone());
    pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();

    let start = unix_nanos() - 10 * NANOS_PER_SECOND;
    let mut next = feed(&pipeline, start, start + NANOS_PER_SECOND, 10.0);

    pipeline.calculate_baseline();
    for _ in 0..3 {
        next = feed(&pipeline, next, next + NANOS_PER_SECOND / 2, 10.0);
        pipeline.run_cycle(next - STEP).unwrap();
    }
    let baseline = pipeline.stop_calculate_baseline().unwrap();
    assert!(baseline >= 0.0);
    assert_eq!(pipeline.baseline(), baseline);

    next = feed(&pipeline, next, next + NANOS_PER_SECOND / 2, 10.0);
    let frame = pipeline.process_signal(next - STEP).unwrap().unwrap();
    let raw = pipeline.analyze(&frame).unwrap();

    next = feed(&pipeline, next, next + NANOS_PER_SECOND / 2, 10.0);
    let (_, events) = pipeline.subscribe(4, false);
    pipeline.run_cycle(next - STEP).unwrap();
    let smoothed = cycles(events.drain());
    let alpha = smoothed[0].band(8.0, 13.0).unwrap();
    assert!((alpha - (raw.band(8.0, 13.0).unwrap() - baseline)).abs() < 0.5);

    pipeline.reset_baseline();
    assert_eq!(pipeline.baseline(), 0.0);
    pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();
}

#[test]
fn ingress_feeds_scheduled_pipeline() {
    init_tracing();
    let pipeline = Arc::new(SpectraPipeline::new(fast_config()).unwrap());
    let listener = Arc::new(CountingListener::default());
    pipeline.add_listener(listener.clone());
    let mut ingress = SampleIngress::spawn(Arc::clone(&pipeline), 4096).unwrap();
    let sender = ingress.sender();

    pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();
    let producer = {
        let sender = sender.clone();
        thread::spawn(move || {
            let origin = unix_nanos();
            let mut t = origin - NANOS_PER_SECOND - 10 * NANOS_PER_MILLI;
            t -= t.rem_euclid(STEP);
            while t < origin + 700 * NANOS_PER_MILLI {
                while t < unix_nanos() + 2 * NANOS_PER_MILLI {
                    sender.send_sample(t, value_at(t, 10.0));
                    t += STEP;
                }
                thread::sleep(Duration::from_millis(1));
            }
        })
    };
    producer.join().unwrap();
    pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();
    let delivered = ingress.shutdown();

    assert!(delivered > RATE as u64);
    assert_eq!(sender.dropped(), 0);
    assert!(listener.cycles.load(Ordering::SeqCst) >= 2);
}

#[test]
fn runtime_config_change_applies_without_restart() {
    let pipeline = SpectraPipeline::new(manual_config()).unwrap();
    pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();
    let (_, events) = pipeline.subscribe(8, false);

    let now = unix_nanos() - 5 * NANOS_PER_SECOND;
    let next = feed(&pipeline, now, now + 2 * NANOS_PER_SECOND, 10.0);
    pipeline.run_cycle(next - STEP).unwrap();

    pipeline
        .update_config(|c| {
            c.set_frequencies(vec![10.0, 20.0])?;
            c.set_sample_size(128)
        })
        .unwrap();
    let next = feed(&pipeline, next, next + 2 * NANOS_PER_SECOND, 10.0);
    assert_eq!(pipeline.run_cycle(next - STEP).unwrap(), CycleOutcome::Completed);
    pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();

    let snapshots = cycles(events.drain());
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].len() + 1, snapshots[1].len());
    assert!(snapshots[1].power(10.0).unwrap() > snapshots[1].power(20.0).unwrap());
}

/// Stops the pipeline on the first completed cycle, as a transport watchdog would
struct StopOnFirstCycle {
    pipeline: parking_lot::Mutex<Option<Arc<SpectraPipeline>>>,
}

impl PipelineListener for StopOnFirstCycle {
    fn on_cycle_completed(&self, _snapshot: &PowerSnapshot) {
        if let Some(pipeline) = self.pipeline.lock().take() {
            pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();
        }
    }
}

#[test]
fn listener_can_stop_the_pipeline() {
    init_tracing();
    let pipeline = Arc::new(SpectraPipeline::new(fast_config()).unwrap());
    pipeline.add_listener(Arc::new(StopOnFirstCycle {
        pipeline: parking_lot::Mutex::new(Some(Arc::clone(&pipeline))),
    }));
    pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let producer = spawn_producer(Arc::clone(&pipeline), 10.0, Arc::clone(&stop));
    thread::sleep(Duration::from_millis(700));

    assert_eq!(pipeline.state(), ConnectionState::Stopped);
    let stats = pipeline.stats();
    assert!(!stats.is_running, "{:?}", stats);
    assert_eq!(stats.failed, 0, "{:?}", stats);
    assert_eq!(pipeline.pending_samples(), 0);

    // no more ticks once stopped
    thread::sleep(Duration::from_millis(200));
    assert_eq!(pipeline.stats().ticks, stats.ticks);
    stop.store(true, Ordering::Relaxed);
    producer.join().unwrap();

    // a later start from the owner works normally
    pipeline.on_connection_state_changed(ConnectionState::Started).unwrap();
    assert!(pipeline.stats().is_running);
    pipeline.on_connection_state_changed(ConnectionState::Stopped).unwrap();
}
