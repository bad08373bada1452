//! Bounded channel with a selectable overflow policy
//!
//! Writes never block. When the channel is full the policy decides which item
//! is lost: the oldest queued one or the one being sent. Items reach the
//! single consumer in submission order.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What to drop when a send finds the channel full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room
    DropOldest,
    /// Discard the item being sent
    DropNewest,
}

/// Outcome of a non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queued after evicting the oldest item
    Replaced,
    /// The sent item was discarded
    Dropped,
}

/// Producer half
#[derive(Debug)]
pub struct BoundedSender<T> {
    tx: Sender<T>,
    // consumer-side handle used to evict under DropOldest
    evict: Receiver<T>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
    /// Set once the consumer is gone; `evict` keeps crossbeam from noticing
    closed: Arc<AtomicBool>,
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            policy: self.policy,
            dropped: Arc::clone(&self.dropped),
            closed: Arc::clone(&self.closed),
        }
    }
}

/// Consumer half
#[derive(Debug)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

/// Create a channel holding at most `capacity` items
pub fn bounded<T>(capacity: usize, policy: OverflowPolicy) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    (
        BoundedSender {
            tx,
            evict: rx.clone(),
            policy,
            dropped: Arc::clone(&dropped),
            closed: Arc::clone(&closed),
        },
        BoundedReceiver { rx, dropped, closed },
    )
}

impl<T> BoundedSender<T> {
    /// Send without blocking, applying the overflow policy when full
    ///
    /// Once the receiver is dropped every item is discarded.
    pub fn send(&self, item: T) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Dropped;
        }
        let mut item = item;
        let mut replaced = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) if replaced => return SendOutcome::Replaced,
                Ok(()) => return SendOutcome::Queued,
                Err(TrySendError::Disconnected(_)) => return SendOutcome::Dropped,
                Err(TrySendError::Full(rejected)) => match self.policy {
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return SendOutcome::Dropped;
                    }
                    OverflowPolicy::DropOldest => {
                        // the consumer may have drained it meanwhile
                        if self.evict.try_recv().is_ok() {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            replaced = true;
                        }
                        item = rejected;
                    }
                },
            }
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Whether the receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Items lost to the overflow policy so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> BoundedReceiver<T> {
    /// Block until an item arrives or every sender is gone
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    /// Everything queued right now
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Underlying receiver, for `crossbeam_channel::select!`
    pub fn as_crossbeam(&self) -> &Receiver<T> {
        &self.rx
    }
}

impl<T> Drop for BoundedReceiver<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        // release whatever is still queued
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let (tx, rx) = bounded(3, OverflowPolicy::DropOldest);
        for i in 0..3 {
            assert_eq!(tx.send(i), SendOutcome::Queued);
        }
        assert_eq!(tx.send(3), SendOutcome::Replaced);
        assert_eq!(tx.send(4), SendOutcome::Replaced);
        assert_eq!(rx.drain(), vec![2, 3, 4]);
        assert_eq!(rx.dropped(), 2);
    }

    #[test]
    fn test_drop_newest_keeps_oldest() {
        let (tx, rx) = bounded(2, OverflowPolicy::DropNewest);
        tx.send(1);
        tx.send(2);
        assert_eq!(tx.send(3), SendOutcome::Dropped);
        assert_eq!(rx.drain(), vec![1, 2]);
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = bounded(2, OverflowPolicy::DropOldest);
        tx.send(1);
        assert!(!tx.is_closed());
        drop(rx);

        assert!(tx.is_closed());
        assert_eq!(tx.send(2), SendOutcome::Dropped);
        assert_eq!(tx.send(3), SendOutcome::Dropped);
        assert_eq!(tx.clone().send(4), SendOutcome::Dropped);
        // nothing is evicted for a consumer that is gone
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn test_order_across_threads() {
        let (tx, rx) = bounded(1024, OverflowPolicy::DropOldest);
        let producer = std::thread::spawn(move || {
            for i in 0..500u32 {
                tx.send(i);
            }
        });
        producer.join().unwrap();
        let received = rx.drain();
        assert_eq!(received, (0..500).collect::<Vec<_>>());
        assert!(rx.recv().is_none());
    }
}
