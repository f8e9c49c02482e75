//! Cooperative cancellation
//!
//! A broadcast shutdown signal built on a crossbeam channel that never
//! carries a message: cancelling drops the only sender, and every listener
//! observes the disconnect at once.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

/// Owner side of a broadcast cancellation signal
#[derive(Debug)]
pub struct ShutdownSignal {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

/// Listener side, cheap to clone
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(0);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// New listener bound to this signal
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.receiver.clone(),
        }
    }

    /// Fire the signal. Later calls are no-ops.
    pub fn cancel(&self) {
        self.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownListener {
    /// Channel that becomes ready (disconnected) once cancelled, for `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.receiver.try_recv(),
            Err(channel::TryRecvError::Disconnected)
        )
    }

    /// Block until cancelled
    pub fn wait(&self) {
        let _ = self.receiver.recv();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_cancel_reaches_every_listener() {
        let signal = ShutdownSignal::new();
        let listeners: Vec<_> = (0..4).map(|_| signal.listener()).collect();
        assert!(listeners.iter().all(|l| !l.is_cancelled()));

        signal.cancel();
        signal.cancel();

        assert!(signal.is_cancelled());
        assert!(listeners.iter().all(|l| l.is_cancelled()));
    }

    #[test]
    fn test_wait_unblocks_on_cancel() {
        let signal = ShutdownSignal::new();
        let listener = signal.listener();
        let handle = thread::spawn(move || listener.wait());

        thread::sleep(Duration::from_millis(20));
        signal.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_independent_signals() {
        let a = ShutdownSignal::new();
        let b = ShutdownSignal::new();
        a.cancel();

        assert!(a.listener().is_cancelled());
        assert!(!b.listener().is_cancelled());
    }
}
