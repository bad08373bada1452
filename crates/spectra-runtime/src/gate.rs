//! Start gate released when the pipeline starts

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Writers wait here until the pipeline is started; stopping closes it again
#[derive(Debug, Default)]
pub struct StartGate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl StartGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every waiter
    pub fn open(&self) {
        *self.open.lock() = true;
        self.changed.notify_all();
    }

    pub fn close(&self) {
        *self.open.lock() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block until open
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.changed.wait(&mut open);
        }
    }

    /// Block until open or `timeout` elapses; true when open
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut open = self.open.lock();
        if !*open {
            let _ = self.changed.wait_while_for(&mut open, |open| !*open, timeout);
        }
        *open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_closed_gate_times_out() {
        let gate = StartGate::new();
        let start = Instant::now();
        assert!(!gate.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_open_releases_waiter() {
        let gate = Arc::new(StartGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.wait_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        gate.open();
        assert!(waiter.join().unwrap());

        gate.close();
        assert!(!gate.is_open());
        assert!(!gate.wait_timeout(Duration::from_millis(1)));
    }
}
