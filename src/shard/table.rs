//! Shard implementation
//!
//! HashMap-based key partition with a parking_lot RwLock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::Record;

/// Mutable shard state, only touched under the shard lock
#[derive(Default)]
struct ShardData {
    records: HashMap<String, Arc<Record>>,
    num_writes: u64,
}

/// One independently locked partition of the keyspace
///
/// ## Concurrency:
/// - `data`: RwLock; writes (and the write counter) take the exclusive lock
/// - `num_reads`: atomic, bumped while the shared lock is held
pub struct Shard {
    id: u64,
    data: RwLock<ShardData>,
    num_reads: AtomicU64,
    /// Log cumulative writes every this many writes (0 disables)
    write_log_interval: u64,
}

/// Point-in-time copy of a shard, for diagnostics and tests
#[derive(Debug, Clone)]
pub struct ShardView {
    pub id: u64,
    pub records: HashMap<String, Arc<Record>>,
    pub num_reads: u64,
    pub num_writes: u64,
}

impl ShardView {
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }
}

impl Shard {
    pub fn new(id: u64, write_log_interval: u64) -> Self {
        Self {
            id,
            data: RwLock::new(ShardData::default()),
            num_reads: AtomicU64::new(0),
            write_log_interval,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Look up `key` (shared lock). A miss is a normal `None`.
    pub fn get(&self, key: &str) -> Option<Arc<Record>> {
        let data = self.data.read();
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        data.records.get(key).cloned()
    }

    /// Apply a write under the exclusive lock; returns whether the map changed.
    ///
    /// - absent key: insert
    /// - existing record without a usable timestamp: insert
    /// - otherwise insert only if `existing < incoming` (ties keep the existing record)
    ///
    /// The write counter is incremented whether or not the write applied.
    pub fn put(&self, key: &str, record: Arc<Record>, timestamp_field: &str) -> bool {
        let mut data = self.data.write();

        let applied = match data.records.get(key) {
            None => true,
            Some(existing) => match existing.timestamp(timestamp_field) {
                None => true,
                Some(existing_ts) => match record.timestamp(timestamp_field) {
                    Some(incoming_ts) => existing_ts < incoming_ts,
                    None => {
                        tracing::warn!(
                            shard_id = self.id,
                            key,
                            "Incoming record has no usable '{}'; keeping cached record",
                            timestamp_field
                        );
                        false
                    }
                },
            },
        };

        if applied {
            data.records.insert(key.to_string(), record);
        }

        data.num_writes += 1;
        let num_writes = data.num_writes;
        drop(data);

        if self.write_log_interval > 0 && num_writes % self.write_log_interval == 0 {
            tracing::info!(shard_id = self.id, num_writes, "Shard writes");
        }

        applied
    }

    /// Clone of every record currently held (shared lock)
    pub fn records(&self) -> Vec<(String, Arc<Record>)> {
        self.data
            .read()
            .records
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().records.is_empty()
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u64 {
        self.data.read().num_writes
    }

    /// Consistent copy of this shard's contents and counters
    pub fn view(&self) -> ShardView {
        let data = self.data.read();
        ShardView {
            id: self.id,
            records: data.records.clone(),
            num_reads: self.num_reads.load(Ordering::Relaxed),
            num_writes: data.num_writes,
        }
    }
}
