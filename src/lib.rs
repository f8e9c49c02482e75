//! # ShardCache
//!
//! A sharded, in-process record cache with write-behind persistence:
//! - Last-writer-wins by record timestamp, per key
//! - Independently locked shards (FNV-1a routing)
//! - Every write attempt persisted through a pool of background workers
//! - Drain-before-close shutdown plus a final cache snapshot
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Producers / Consumers (any thread)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ put / get
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  InMemDataStore                              │
//! │        route_key(key) → Shard (RwLock per shard)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ every write attempt
//!          ┌────────────▼────────────┐
//!          │  bounded queue (MPMC)   │
//!          └────────────┬────────────┘
//!          ┌────────────┼────────────┐
//!          ▼            ▼            ▼
//!   ┌───────────┐┌───────────┐┌───────────┐   ┌───────────────┐
//!   │Persister 0││Persister 1││Persister n│   │   Snapshot    │
//!   │Serializer ││Serializer ││Serializer │   │   Persister   │
//!   │  Writer   ││  Writer   ││  Writer   │   │ (at shutdown) │
//!   └─────┬─────┘└─────┬─────┘└─────┬─────┘   └───────┬───────┘
//!         ▼            ▼            ▼                 ▼
//!       0.rec        1.rec        n.rec          snapshot.rec
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod codec;
pub mod container;
pub mod serializer;
pub mod writer;
pub mod signal;
pub mod persister;
pub mod shard;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ImdsError, Result};
pub use config::Config;
pub use record::{Record, Value};
pub use codec::{Field, FieldType, Schema};
pub use serializer::{Payload, Serializer, SerializerKind};
pub use writer::Writer;
pub use persister::{PersistFailure, PersisterState};
pub use store::{InMemDataStore, StoreState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ShardCache
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
