//! Configuration for ShardCache
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::codec::Schema;
use crate::error::{ImdsError, Result};
use crate::serializer::SerializerKind;

/// Main configuration for an in-memory data store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Number of independently locked shards (fixed for the store's lifetime)
    pub num_shards: usize,

    /// Top-level record field compared on conflicting writes
    pub timestamp_field: String,

    /// Log per-shard cumulative writes every N writes (0 disables)
    pub write_log_interval: u64,

    // -------------------------------------------------------------------------
    // Persistence Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the bounded hand-off queue; a full queue blocks `put`
    pub queue_capacity: usize,

    /// Number of persister workers draining the hand-off queue
    pub num_persisters: usize,

    /// Record schema used by serializers and container files
    pub schema: Schema,

    /// Serializer each persister is built with
    pub serializer: SerializerKind,

    /// Directory receiving one container file per persister:
    ///   {output_dir}/
    ///     ├── 0.rec .. {n-1}.rec   (per-record streams)
    ///     └── snapshot.rec         (cache contents at shutdown)
    pub output_dir: PathBuf,

    /// File name (without extension) of the snapshot persister's container
    pub snapshot_name: String,

    /// Failed records held for `InMemDataStore::failures()`; once full,
    /// further failures are only logged
    pub failure_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_shards: 16,
            timestamp_field: "collection_time".to_string(),
            write_log_interval: 500,
            queue_capacity: 1024,
            num_persisters: 4,
            schema: Schema::default(),
            serializer: SerializerKind::Schema,
            output_dir: PathBuf::from("./shardcache_data"),
            snapshot_name: "snapshot".to_string(),
            failure_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(ImdsError::Config("num_shards must be at least 1".into()));
        }
        if self.num_persisters == 0 {
            return Err(ImdsError::Config("num_persisters must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ImdsError::Config("queue_capacity must be at least 1".into()));
        }
        if self.failure_capacity == 0 {
            return Err(ImdsError::Config("failure_capacity must be at least 1".into()));
        }
        if self.timestamp_field.is_empty() {
            return Err(ImdsError::Config("timestamp_field must not be empty".into()));
        }
        if self.snapshot_name.is_empty() {
            return Err(ImdsError::Config("snapshot_name must not be empty".into()));
        }
        if self.snapshot_name.parse::<usize>().is_ok() {
            return Err(ImdsError::Config(format!(
                "snapshot_name '{}' collides with persister file names",
                self.snapshot_name
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the number of shards
    pub fn num_shards(mut self, count: usize) -> Self {
        self.config.num_shards = count;
        self
    }

    /// Set the record field used for conflict resolution
    pub fn timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.config.timestamp_field = field.into();
        self
    }

    /// Set how often shards log their write count
    pub fn write_log_interval(mut self, every: u64) -> Self {
        self.config.write_log_interval = every;
        self
    }

    /// Set the hand-off queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the number of persister workers
    pub fn num_persisters(mut self, count: usize) -> Self {
        self.config.num_persisters = count;
        self
    }

    /// Set the record schema
    pub fn schema(mut self, schema: Schema) -> Self {
        self.config.schema = schema;
        self
    }

    /// Set the serializer kind
    pub fn serializer(mut self, kind: SerializerKind) -> Self {
        self.config.serializer = kind;
        self
    }

    /// Set the output directory for container files
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_dir = path.into();
        self
    }

    /// Set the snapshot container name
    pub fn snapshot_name(mut self, name: impl Into<String>) -> Self {
        self.config.snapshot_name = name.into();
        self
    }

    /// Set how many failed records are held for inspection
    pub fn failure_capacity(mut self, capacity: usize) -> Self {
        self.config.failure_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
