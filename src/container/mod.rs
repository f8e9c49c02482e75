//! Container Module
//!
//! Self-describing, append-only container files holding encoded records.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (10 bytes + schema)                                  │
//! │   Magic: "SHRC" (4) | Version: u16 (2) | SchemaLen: u32 (4) │
//! │   Schema JSON (SchemaLen bytes)                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Block (12 bytes + payload)                                  │
//! │   Count: u32 (4) | PayloadLen: u32 (4) | PayloadCRC: u32 (4)│
//! │   Payload: [RecordLen: u32][Record bytes] × Count           │
//! ├─────────────────────────────────────────────────────────────┤
//! │ ... more blocks, appended until the file is closed ...      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every file carries its own schema, so any subset of files can be opened
//! and decoded independently of the process that wrote them.

mod reader;
mod writer;

use std::fs;
use std::path::{Path, PathBuf};

pub use reader::ContainerReader;
pub use writer::{ContainerSink, ContainerWriter};

use crate::error::Result;
use crate::record::Record;

// =============================================================================
// Shared Constants (used by writer and reader)
// =============================================================================

/// Magic bytes identifying a ShardCache container file
pub(crate) const MAGIC: &[u8; 4] = b"SHRC";

/// Current container format version
pub(crate) const VERSION: u16 = 1;

/// Fixed header prefix: Magic (4) + Version (2) + SchemaLen (4) = 10 bytes
pub(crate) const HEADER_PREFIX_SIZE: usize = 10;

/// Block header: Count (4) + PayloadLen (4) + PayloadCRC (4) = 12 bytes
pub(crate) const BLOCK_HEADER_SIZE: usize = 12;

/// File extension for every container file
pub const FILE_EXTENSION: &str = "rec";

/// Whether `path` looks like a container file
pub fn is_container_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == FILE_EXTENSION)
}

/// List all container files in a directory, sorted by file name
pub fn list_container_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_container_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read every record from a single container file
pub fn read_file_records(path: &Path) -> Result<Vec<Record>> {
    ContainerReader::open(path)?.collect()
}

/// Read every record from every container file in `dir`
pub fn read_dir_records(dir: &Path) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for path in list_container_files(dir)? {
        let recs = read_file_records(&path)?;
        tracing::debug!(path = %path.display(), count = recs.len(), "Loaded container records");
        records.extend(recs);
    }
    Ok(records)
}
