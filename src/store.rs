//! In-Memory Data Store
//!
//! The sharded cache that coordinates shards and the persistence tier.
//!
//! ## Responsibilities
//! - Route keys to shards and apply last-writer-wins writes
//! - Push every write attempt onto the bounded persistence queue
//! - Start the persister pool and the snapshot persister
//! - Shut down without losing queued records, then capture the final cache
//!
//! ## Data Flow
//! ```text
//!   put(key, record)
//!        │
//!        ├──► shard (exclusive lock) ── last-writer-wins ──► cache
//!        │
//!        └──► bounded queue ──► persister pool ──► 0.rec .. n-1.rec
//!
//!   shutdown()
//!        └──► cache contents ──► snapshot queue ──► snapshot persister ──► snapshot.rec
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{ImdsError, Result};
use crate::persister::{PersistFailure, Persister, PersisterConfig, PersisterHandle};
use crate::record::Record;
use crate::serializer::build_serializer;
use crate::shard::{route_key, Shard, ShardView};
use crate::signal::ShutdownSignal;
use crate::writer::{ContainerFileWriter, FileName};

/// Store lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Created,
    Started,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreState::Created => "created",
            StoreState::Started => "started",
            StoreState::ShuttingDown => "shutting down",
            StoreState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Persisters built at construction, consumed by `start`
struct PendingPersisters {
    pool: Vec<Persister>,
    snapshot: Option<Persister>,
}

/// Sharded in-memory cache with write-behind persistence
///
/// ## Concurrency Model
///
/// - **Shards**: each shard has its own RwLock; no cross-shard locking
/// - **Lifecycle**: `state` is an RwLock. `put` holds the shared side for
///   its whole duration (including a blocking enqueue), so `shutdown`,
///   which takes the exclusive side, only proceeds once every in-flight
///   `put` has enqueued its record. No record can be enqueued after the
///   persisters are cancelled.
/// - **Persistence**: a bounded MPMC queue shared by the persister pool;
///   the snapshot persister owns a dedicated unbounded queue.
pub struct InMemDataStore {
    config: Config,

    /// Shards indexed `0..num_shards`
    shards: Vec<Shard>,

    /// Producer side of the per-record persistence queue
    queue: Sender<Arc<Record>>,

    /// Producer side of the snapshot persister's queue
    snapshot_queue: Sender<Arc<Record>>,

    /// Cancels the persister pool
    persister_signal: ShutdownSignal,

    /// Cancels the snapshot persister, independently of the pool
    snapshot_signal: ShutdownSignal,

    pending: Mutex<PendingPersisters>,
    handles: Mutex<Vec<PersisterHandle>>,

    /// Bounded; persisters log and drop failures once it is full
    failures: Receiver<PersistFailure>,

    state: RwLock<StoreState>,

    /// Unix millis at `start`
    start_time: Mutex<Option<u64>>,
}

impl InMemDataStore {
    /// Build a store and all of its persisters
    ///
    /// Creates the output directory and every container file up front, so
    /// an unusable output location fails here rather than at `start`.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.output_dir)?;

        let (queue, queue_rx) = channel::bounded(config.queue_capacity);
        let (snapshot_queue, snapshot_rx) = channel::unbounded();
        let (failures_tx, failures) = channel::bounded(config.failure_capacity);

        let persister_signal = ShutdownSignal::new();
        let snapshot_signal = ShutdownSignal::new();

        let mut pool = Vec::with_capacity(config.num_persisters);
        for id in 0..config.num_persisters {
            let writer = ContainerFileWriter::create(
                id,
                &config.output_dir,
                FileName::WorkerId(id),
                config.schema.clone(),
            )?;
            pool.push(Persister::new(PersisterConfig {
                id,
                input: queue_rx.clone(),
                serializer: build_serializer(config.serializer, &config.schema),
                writer: Box::new(writer),
                shutdown: persister_signal.listener(),
                failures: failures_tx.clone(),
            }));
        }

        let snapshot_id = config.num_persisters;
        let snapshot_writer = ContainerFileWriter::create(
            snapshot_id,
            &config.output_dir,
            FileName::Override(config.snapshot_name.clone()),
            config.schema.clone(),
        )?;
        let snapshot = Persister::new(PersisterConfig {
            id: snapshot_id,
            input: snapshot_rx,
            serializer: build_serializer(config.serializer, &config.schema),
            writer: Box::new(snapshot_writer),
            shutdown: snapshot_signal.listener(),
            failures: failures_tx,
        });

        let shards = (0..config.num_shards as u64)
            .map(|id| Shard::new(id, config.write_log_interval))
            .collect();

        tracing::info!(
            num_shards = config.num_shards,
            num_persisters = config.num_persisters,
            queue_capacity = config.queue_capacity,
            output_dir = %config.output_dir.display(),
            "In-memory data store created"
        );

        Ok(Self {
            config,
            shards,
            queue,
            snapshot_queue,
            persister_signal,
            snapshot_signal,
            pending: Mutex::new(PendingPersisters {
                pool,
                snapshot: Some(snapshot),
            }),
            handles: Mutex::new(Vec::new()),
            failures,
            state: RwLock::new(StoreState::Created),
            start_time: Mutex::new(None),
        })
    }

    /// Start every persister. The store accepts writes once this returns.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.write();
        if *state != StoreState::Created {
            return Err(ImdsError::InvalidState {
                operation: "start",
                state: state.to_string(),
            });
        }

        *self.start_time.lock() = Some(unix_millis());

        let mut pending = self.pending.lock();
        let mut to_run: Vec<Persister> = pending.pool.drain(..).collect();
        to_run.extend(pending.snapshot.take());
        drop(pending);

        let mut handles = self.handles.lock();
        for persister in to_run {
            match persister.run() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::error!("Failed to start persister: {}", e);
                    self.persister_signal.cancel();
                    self.snapshot_signal.cancel();
                    for handle in handles.drain(..) {
                        let id = handle.id();
                        if let Err(e) = handle.join() {
                            tracing::error!(persister_id = id, "Persister did not stop cleanly: {}", e);
                        }
                    }
                    *state = StoreState::Stopped;
                    return Err(e);
                }
            }
        }

        *state = StoreState::Started;
        tracing::info!(persisters = handles.len(), "In-memory data store started");
        Ok(())
    }

    /// Look up the cached record for `key`
    pub fn get(&self, key: &str) -> Result<Option<Arc<Record>>> {
        Ok(self.shard_for(key)?.get(key))
    }

    /// Write `record` under `key`
    ///
    /// The cache keeps it only if it is newer than the cached record (see
    /// [`Shard::put`]); it is queued for persistence either way. Blocks while
    /// the persistence queue is full. Returns whether the cache changed.
    pub fn put(&self, key: &str, record: impl Into<Arc<Record>>) -> Result<bool> {
        let state = self.state.read();
        if *state != StoreState::Started {
            return Err(ImdsError::InvalidState {
                operation: "put",
                state: state.to_string(),
            });
        }

        let shard = self.shard_for(key)?;
        let record = record.into();
        let applied = shard.put(key, Arc::clone(&record), &self.config.timestamp_field);

        self.queue.send(record).map_err(|_| ImdsError::QueueClosed)?;
        Ok(applied)
    }

    /// Merge every shard's contents into one map.
    ///
    /// Each shard is read independently; the result is not a consistent
    /// cut across shards.
    pub fn get_all(&self) -> HashMap<String, Arc<Record>> {
        let mut all = HashMap::new();
        for shard in &self.shards {
            all.extend(shard.records());
        }
        all
    }

    /// Per-shard copies of contents and counters
    pub fn shards(&self) -> Vec<ShardView> {
        self.shards.iter().map(Shard::view).collect()
    }

    /// Stop the store
    ///
    /// 1. Wait for in-flight `put`s, then refuse new ones
    /// 2. Cancel the persister pool (each drains the queue, then closes its file)
    /// 3. Push the cache contents through the snapshot persister and cancel it
    /// 4. Block until every persister has stopped
    ///
    /// The store ends `Stopped` even when a step fails; the first error is
    /// returned after every persister has been joined.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != StoreState::Started {
                return Err(ImdsError::InvalidState {
                    operation: "shutdown",
                    state: state.to_string(),
                });
            }
            *state = StoreState::ShuttingDown;
        }

        tracing::info!("Shutdown command received, shutting down persisters");
        self.persister_signal.cancel();

        let snapshot = self.persist_cache();
        self.snapshot_signal.cancel();
        let mut result = match snapshot {
            Ok(count) => {
                tracing::info!(records = count, "Cache snapshot queued");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to queue cache snapshot: {}", e);
                Err(e)
            }
        };

        tracing::info!("Waiting for all persisters to finish shutting down");
        let handles: Vec<PersisterHandle> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let id = handle.id();
            if let Err(e) = handle.join() {
                tracing::error!(persister_id = id, "Persister did not stop cleanly: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        *self.state.write() = StoreState::Stopped;
        tracing::info!("Shutdown complete");
        result
    }

    /// Queue the current cache contents for the snapshot persister
    fn persist_cache(&self) -> Result<usize> {
        let mut count = 0;
        for shard in &self.shards {
            for (_, record) in shard.records() {
                self.snapshot_queue
                    .send(record)
                    .map_err(|_| ImdsError::QueueClosed)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn shard_for(&self, key: &str) -> Result<&Shard> {
        let shard_id = route_key(key, self.shards.len());
        self.shards
            .get(shard_id as usize)
            .ok_or_else(|| ImdsError::ShardResolution {
                key: key.to_string(),
                shard_id,
            })
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn state(&self) -> StoreState {
        *self.state.read()
    }

    /// Unix millis recorded by `start`
    pub fn start_time(&self) -> Option<u64> {
        *self.start_time.lock()
    }

    /// Records the persisters failed to serialize or write, up to
    /// `failure_capacity` undrained at a time
    pub fn failures(&self) -> Receiver<PersistFailure> {
        self.failures.clone()
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Records currently waiting in the persistence queue
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for InMemDataStore {
    fn drop(&mut self) {
        if self.state() == StoreState::Started {
            tracing::warn!("Store dropped while running; shutting down");
            if let Err(e) = self.shutdown() {
                tracing::error!("Shutdown on drop failed: {}", e);
            }
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::container::read_dir_records;

    #[test]
    fn test_shutdown_completes_when_snapshot_cannot_be_queued() {
        let dir = TempDir::new().unwrap();
        let config = Config::builder()
            .output_dir(dir.path())
            .num_persisters(2)
            .build();
        let store = InMemDataStore::open(config).unwrap();
        store.start().unwrap();
        store
            .put("k", Record::new().with("id", "k").with("collection_time", 1i64))
            .unwrap();

        // Stop the snapshot persister early so its queue has no receiver
        store.snapshot_signal.cancel();
        let snapshot_handle = {
            let mut handles = store.handles.lock();
            let pos = handles
                .iter()
                .position(|h| h.id() == store.config.num_persisters)
                .unwrap();
            handles.remove(pos)
        };
        snapshot_handle.join().unwrap();

        assert!(matches!(store.shutdown(), Err(ImdsError::QueueClosed)));
        assert_eq!(store.state(), StoreState::Stopped);
        assert!(store.handles.lock().is_empty());

        // The pool still drained and closed its files
        assert_eq!(read_dir_records(dir.path()).unwrap().len(), 1);
    }
}
