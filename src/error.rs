//! Error types for ShardCache
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ImdsError
pub type Result<T> = std::result::Result<T, ImdsError>;

/// Unified error type for ShardCache operations
#[derive(Debug, Error)]
pub enum ImdsError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Invalid schema: {0}")]
    Schema(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    // -------------------------------------------------------------------------
    // Container File Errors
    // -------------------------------------------------------------------------
    #[error("Container corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Routing Errors
    // -------------------------------------------------------------------------
    #[error("Unable to resolve shard; key={key}, shard_id={shard_id}")]
    ShardResolution { key: String, shard_id: u64 },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Persistence queue closed")]
    QueueClosed,

    #[error("Persister {0} terminated abnormally")]
    WorkerPanicked(usize),
}
