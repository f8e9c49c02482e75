//! Persister
//!
//! A background worker that consumes records from a queue, serializes them
//! and hands them to its writer.
//!
//! ## Lifecycle
//! ```text
//!   Idle ──run()──► Running ──cancel / queue closed──► Draining ──► Stopped
//! ```
//!
//! Once cancelled, the worker pulls every record still queued (without
//! blocking) and persists it before the writer is shut down. A record that
//! was enqueued before cancellation is therefore never lost.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use crossbeam::select;
use parking_lot::Mutex;

use crate::error::{ImdsError, Result};
use crate::record::Record;
use crate::serializer::Serializer;
use crate::signal::ShutdownListener;
use crate::writer::Writer;

/// Persister lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersisterState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for PersisterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PersisterState::Idle => "idle",
            PersisterState::Running => "running",
            PersisterState::Draining => "draining",
            PersisterState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A record the persister could not serialize or write
#[derive(Debug)]
pub struct PersistFailure {
    pub persister_id: usize,
    pub record: Arc<Record>,
    pub error: ImdsError,
}

/// Everything a persister is built from
pub struct PersisterConfig {
    pub id: usize,
    pub input: Receiver<Arc<Record>>,
    pub serializer: Box<dyn Serializer>,
    pub writer: Box<dyn Writer>,
    pub shutdown: ShutdownListener,
    pub failures: Sender<PersistFailure>,
}

/// Queue consumer bound to one serializer and one writer
pub struct Persister {
    id: usize,
    input: Receiver<Arc<Record>>,
    serializer: Box<dyn Serializer>,
    writer: Box<dyn Writer>,
    shutdown: ShutdownListener,
    failures: Sender<PersistFailure>,
    state: Arc<Mutex<PersisterState>>,
    persisted: u64,
}

impl Persister {
    pub fn new(config: PersisterConfig) -> Self {
        Self {
            id: config.id,
            input: config.input,
            serializer: config.serializer,
            writer: config.writer,
            shutdown: config.shutdown,
            failures: config.failures,
            state: Arc::new(Mutex::new(PersisterState::Idle)),
            persisted: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> PersisterState {
        *self.state.lock()
    }

    /// Spawn the worker thread. The persister is consumed; it cannot be
    /// restarted after it stops.
    pub fn run(self) -> Result<PersisterHandle> {
        let id = self.id;
        let state = Arc::clone(&self.state);
        *state.lock() = PersisterState::Running;

        tracing::info!(persister_id = id, "Persister starting");

        let spawned = thread::Builder::new()
            .name(format!("persister-{}", id))
            .spawn(move || self.run_loop());

        match spawned {
            Ok(thread) => Ok(PersisterHandle { id, state, thread }),
            Err(e) => {
                *state.lock() = PersisterState::Stopped;
                Err(e.into())
            }
        }
    }

    fn run_loop(mut self) {
        let input = self.input.clone();
        let shutdown = self.shutdown.receiver().clone();
        loop {
            select! {
                recv(input) -> msg => match msg {
                    Ok(record) => self.persist(record),
                    Err(_) => {
                        tracing::debug!(persister_id = self.id, "Input queue disconnected");
                        break;
                    }
                },
                recv(shutdown) -> _ => {
                    tracing::info!(persister_id = self.id, "Persister exiting run loop on cancellation");
                    break;
                }
            }
        }

        self.drain();
        self.writer.shutdown();
        self.set_state(PersisterState::Stopped);

        tracing::info!(persister_id = self.id, persisted = self.persisted, "Persister stopped");
    }

    /// Persist everything still queued, never blocking on an empty queue
    fn drain(&mut self) {
        self.set_state(PersisterState::Draining);
        let mut drained = 0u64;
        while let Ok(record) = self.input.try_recv() {
            self.persist(record);
            drained += 1;
        }
        tracing::debug!(persister_id = self.id, drained, "Persister drained input queue");
    }

    fn persist(&mut self, record: Arc<Record>) {
        let result = self
            .serializer
            .serialize(Arc::clone(&record))
            .and_then(|payload| self.writer.write(payload));

        match result {
            Ok(()) => self.persisted += 1,
            Err(error) => {
                tracing::error!(persister_id = self.id, "Failed to persist record: {}", error);
                let failure = PersistFailure {
                    persister_id: self.id,
                    record,
                    error,
                };
                match self.failures.try_send(failure) {
                    Ok(()) => {}
                    Err(TrySendError::Full(unreported)) => {
                        tracing::error!(
                            persister_id = self.id,
                            record = ?unreported.record,
                            "Failure channel full; record not persisted"
                        );
                    }
                    Err(TrySendError::Disconnected(unreported)) => {
                        tracing::error!(
                            persister_id = self.id,
                            record = ?unreported.record,
                            "No failure receiver; record not persisted"
                        );
                    }
                }
            }
        }
    }

    fn set_state(&self, state: PersisterState) {
        *self.state.lock() = state;
    }
}

/// Handle to a running persister thread
pub struct PersisterHandle {
    id: usize,
    state: Arc<Mutex<PersisterState>>,
    thread: JoinHandle<()>,
}

impl PersisterHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> PersisterState {
        *self.state.lock()
    }

    /// Block until the worker has drained and closed its writer
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| ImdsError::WorkerPanicked(self.id))
    }
}

#[cfg(test)]
mod tests {
    use crossbeam::channel;

    use super::*;
    use crate::serializer::{NoopSerializer, Payload};
    use crate::signal::ShutdownSignal;

    /// In-memory writer capturing payloads
    #[derive(Clone, Default)]
    struct MemoryWriter {
        written: Arc<Mutex<Vec<Arc<Record>>>>,
        shutdowns: Arc<Mutex<usize>>,
        fail_on: Option<String>,
    }

    impl Writer for MemoryWriter {
        fn write(&mut self, payload: Payload) -> Result<()> {
            let Payload::Record(record) = payload else {
                return Err(ImdsError::Encoding("unexpected bytes".into()));
            };
            if let (Some(bad), Some(id)) = (&self.fail_on, record.get("id")) {
                if id.as_str() == Some(bad.as_str()) {
                    return Err(ImdsError::Encoding(format!("rejecting {}", bad)));
                }
            }
            self.written.lock().push(record);
            Ok(())
        }

        fn shutdown(&mut self) {
            *self.shutdowns.lock() += 1;
        }
    }

    fn record(id: &str, ts: i64) -> Arc<Record> {
        Arc::new(Record::new().with("id", id).with("collection_time", ts))
    }

    fn build(
        input: Receiver<Arc<Record>>,
        writer: MemoryWriter,
        signal: &ShutdownSignal,
    ) -> (Persister, Receiver<PersistFailure>) {
        let (failures_tx, failures_rx) = channel::unbounded();
        let persister = Persister::new(PersisterConfig {
            id: 7,
            input,
            serializer: Box::new(NoopSerializer::new()),
            writer: Box::new(writer),
            shutdown: signal.listener(),
            failures: failures_tx,
        });
        (persister, failures_rx)
    }

    #[test]
    fn test_lifecycle_states() {
        let (_tx, rx) = channel::bounded(4);
        let signal = ShutdownSignal::new();
        let (persister, _failures) = build(rx, MemoryWriter::default(), &signal);
        assert_eq!(persister.state(), PersisterState::Idle);

        let handle = persister.run().unwrap();
        assert_eq!(handle.state(), PersisterState::Running);

        signal.cancel();
        let state = Arc::clone(&handle.state);
        handle.join().unwrap();
        assert_eq!(*state.lock(), PersisterState::Stopped);
    }

    #[test]
    fn test_drains_queue_before_shutdown() {
        let (tx, rx) = channel::bounded(1000);
        let writer = MemoryWriter::default();
        let signal = ShutdownSignal::new();

        // Fill the queue and cancel before the worker ever runs
        for i in 0..500 {
            tx.send(record("k", i)).unwrap();
        }
        signal.cancel();

        let (persister, _failures) = build(rx, writer.clone(), &signal);
        persister.run().unwrap().join().unwrap();

        let written = writer.written.lock();
        assert_eq!(written.len(), 500);
        assert_eq!(written[499].timestamp("collection_time"), Some(499));
        assert_eq!(*writer.shutdowns.lock(), 1);
    }

    #[test]
    fn test_disconnected_queue_stops_worker() {
        let (tx, rx) = channel::bounded(8);
        let writer = MemoryWriter::default();
        let signal = ShutdownSignal::new();
        let (persister, _failures) = build(rx, writer.clone(), &signal);
        let handle = persister.run().unwrap();

        tx.send(record("a", 1)).unwrap();
        tx.send(record("b", 2)).unwrap();
        drop(tx);

        handle.join().unwrap();
        assert_eq!(writer.written.lock().len(), 2);
        assert_eq!(*writer.shutdowns.lock(), 1);
    }

    #[test]
    fn test_failures_are_reported_not_dropped() {
        let (tx, rx) = channel::bounded(8);
        let writer = MemoryWriter {
            fail_on: Some("bad".into()),
            ..MemoryWriter::default()
        };
        let signal = ShutdownSignal::new();
        let (persister, failures) = build(rx, writer.clone(), &signal);

        tx.send(record("good", 1)).unwrap();
        tx.send(record("bad", 2)).unwrap();
        tx.send(record("good", 3)).unwrap();
        signal.cancel();
        persister.run().unwrap().join().unwrap();

        assert_eq!(writer.written.lock().len(), 2);
        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.persister_id, 7);
        assert_eq!(failure.record.timestamp("collection_time"), Some(2));
        assert!(matches!(failure.error, ImdsError::Encoding(_)));
        assert!(failures.try_recv().is_err());
    }

    #[test]
    fn test_full_failure_channel_does_not_block() {
        let (tx, rx) = channel::bounded(64);
        let writer = MemoryWriter {
            fail_on: Some("bad".into()),
            ..MemoryWriter::default()
        };
        let signal = ShutdownSignal::new();
        let (failures_tx, failures_rx) = channel::bounded(2);
        let persister = Persister::new(PersisterConfig {
            id: 3,
            input: rx,
            serializer: Box::new(NoopSerializer::new()),
            writer: Box::new(writer.clone()),
            shutdown: signal.listener(),
            failures: failures_tx,
        });

        for i in 0..50 {
            tx.send(record("bad", i)).unwrap();
        }
        tx.send(record("good", 50)).unwrap();
        signal.cancel();
        persister.run().unwrap().join().unwrap();

        assert_eq!(failures_rx.len(), 2);
        assert_eq!(writer.written.lock().len(), 1);
    }

    #[test]
    fn test_dropped_failure_receiver_is_tolerated() {
        let (tx, rx) = channel::bounded(8);
        let writer = MemoryWriter {
            fail_on: Some("bad".into()),
            ..MemoryWriter::default()
        };
        let signal = ShutdownSignal::new();
        let (persister, failures) = build(rx, writer.clone(), &signal);
        drop(failures);

        tx.send(record("bad", 1)).unwrap();
        tx.send(record("good", 2)).unwrap();
        signal.cancel();
        persister.run().unwrap().join().unwrap();

        assert_eq!(writer.written.lock().len(), 1);
        assert_eq!(*writer.shutdowns.lock(), 1);
    }
}
