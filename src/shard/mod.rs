//! Shard Module
//!
//! Partitions the keyspace into independently locked shards.
//!
//! ## Responsibilities
//! - Route every key to exactly one shard (FNV-1a 64, modulo shard count)
//! - Hold the latest record per key under a per-shard RwLock
//! - Enforce last-writer-wins by timestamp on every write
//! - Track per-shard read/write counters

mod router;
mod table;

pub use router::route_key;
pub use table::{Shard, ShardView};
