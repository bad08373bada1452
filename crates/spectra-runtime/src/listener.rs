//! Pipeline listeners and their registry
//!
//! The registry is copy-on-write: adding or removing a listener swaps in a
//! new list, and notification iterates a snapshot taken without holding the
//! lock.

use crate::channel::{bounded, BoundedReceiver, BoundedSender, OverflowPolicy, SendOutcome};
use crate::gate::StartGate;
use parking_lot::RwLock;
use spectra_core::PowerSnapshot;
use spectra_processing::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Receives pipeline output; both callbacks run on the worker thread
pub trait PipelineListener: Send + Sync {
    /// Once per completed cycle
    fn on_cycle_completed(&self, _snapshot: &PowerSnapshot) {}

    /// Once per analysed frame
    fn on_frame_processed(&self, _frame: &Frame) {}
}

/// Handle for removing a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Entries = Arc<Vec<(ListenerId, Arc<dyn PipelineListener>)>>;

/// Copy-on-write listener list
#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<Entries>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn PipelineListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push((id, listener));
        *entries = Arc::new(next);
        id
    }

    /// True when `id` was registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn snapshot(&self) -> Entries {
        Arc::clone(&self.entries.read())
    }

    pub fn notify_cycle(&self, snapshot: &PowerSnapshot) {
        for (_, listener) in self.snapshot().iter() {
            listener.on_cycle_completed(snapshot);
        }
    }

    pub fn notify_frame(&self, frame: &Frame) {
        for (_, listener) in self.snapshot().iter() {
            listener.on_frame_processed(frame);
        }
    }
}

/// Event delivered through a [`ChannelListener`]
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    CycleCompleted(PowerSnapshot),
    FrameProcessed(Arc<Frame>),
}

/// Forwards events into a bounded channel for pull-style consumers
///
/// Sends wait on the start gate, so nothing is published while stopped.
#[derive(Debug)]
pub struct ChannelListener {
    sender: BoundedSender<PipelineEvent>,
    gate: Arc<StartGate>,
    gate_timeout: Duration,
    frames: bool,
}

impl ChannelListener {
    /// Listener plus the receiving end; oldest events are dropped when full
    pub fn new(
        capacity: usize,
        gate: Arc<StartGate>,
        gate_timeout: Duration,
    ) -> (Self, BoundedReceiver<PipelineEvent>) {
        let (sender, receiver) = bounded(capacity, OverflowPolicy::DropOldest);
        (
            Self {
                sender,
                gate,
                gate_timeout,
                frames: false,
            },
            receiver,
        )
    }

    /// Also forward processed frames
    pub fn with_frames(mut self) -> Self {
        self.frames = true;
        self
    }

    /// Whether the subscriber dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn publish(&self, event: PipelineEvent) {
        if self.sender.is_closed() {
            trace!("receiver dropped, event discarded");
            return;
        }
        if !self.gate.wait_timeout(self.gate_timeout) {
            trace!("gate closed, event discarded");
            return;
        }
        if self.sender.send(event) == SendOutcome::Replaced {
            trace!(dropped = self.sender.dropped(), "event channel full, oldest evicted");
        }
    }
}

impl PipelineListener for ChannelListener {
    fn on_cycle_completed(&self, snapshot: &PowerSnapshot) {
        self.publish(PipelineEvent::CycleCompleted(snapshot.clone()));
    }

    fn on_frame_processed(&self, frame: &Frame) {
        if self.frames {
            self.publish(PipelineEvent::FrameProcessed(Arc::new(frame.clone())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        cycles: AtomicUsize,
        frames: AtomicUsize,
    }

    impl PipelineListener for Counter {
        fn on_cycle_completed(&self, _snapshot: &PowerSnapshot) {
            self.cycles.fetch_add(1, Ordering::SeqCst);
        }

        fn on_frame_processed(&self, _frame: &Frame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn snapshot() -> PowerSnapshot {
        PowerSnapshot::builder(0, 256.0).frequency(10.0, 1.0).unwrap().build()
    }

    #[test]
    fn test_add_remove_notify() {
        let registry = ListenerRegistry::new();
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let id_a = registry.add(a.clone());
        registry.add(b.clone());

        registry.notify_cycle(&snapshot());
        registry.notify_frame(&Frame::new(vec![0.0; 4], 4.0, 0));
        assert!(registry.remove(id_a));
        assert!(!registry.remove(id_a));
        registry.notify_cycle(&snapshot());

        assert_eq!(a.cycles.load(Ordering::SeqCst), 1);
        assert_eq!(a.frames.load(Ordering::SeqCst), 1);
        assert_eq!(b.cycles.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_listener_may_modify_registry_while_notified() {
        struct Registering {
            registry: Arc<ListenerRegistry>,
        }
        impl PipelineListener for Registering {
            fn on_cycle_completed(&self, _snapshot: &PowerSnapshot) {
                self.registry.add(Arc::new(Counter::default()));
            }
        }

        let registry = Arc::new(ListenerRegistry::new());
        registry.add(Arc::new(Registering { registry: Arc::clone(&registry) }));
        registry.notify_cycle(&snapshot());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_channel_listener_respects_gate() {
        let gate = Arc::new(StartGate::new());
        let (listener, events) = ChannelListener::new(4, Arc::clone(&gate), Duration::from_millis(5));

        listener.on_cycle_completed(&snapshot());
        assert!(events.is_empty());

        gate.open();
        listener.on_cycle_completed(&snapshot());
        listener.on_frame_processed(&Frame::new(vec![0.0; 4], 4.0, 0));
        let received = events.drain();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], PipelineEvent::CycleCompleted(_)));
    }

    #[test]
    fn test_channel_listener_stops_after_receiver_dropped() {
        let gate = Arc::new(StartGate::new());
        gate.open();
        let (listener, events) = ChannelListener::new(2, gate, Duration::from_millis(5));
        listener.on_cycle_completed(&snapshot());
        assert!(!listener.is_closed());

        drop(events);
        assert!(listener.is_closed());
        for _ in 0..4 {
            listener.on_cycle_completed(&snapshot());
        }
        assert_eq!(listener.sender.dropped(), 0);
    }
}
