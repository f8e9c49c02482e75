//! Container Writer
//!
//! Appends blocks of encoded records to a new container file.
//!
//! A block is either fully in the file or not at all: when an append fails
//! partway, the bytes of that block are discarded and the sink is cut back
//! to the end of the last complete block. If the cut itself fails the
//! container is poisoned and refuses every later append.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::Schema;
use crate::error::{ImdsError, Result};

use super::{BLOCK_HEADER_SIZE, HEADER_PREFIX_SIZE, MAGIC, VERSION};

/// Byte sink a container is written to
pub trait ContainerSink: Write + Seek {
    /// Cut the sink back to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Make everything written so far durable
    fn sync(&mut self) -> io::Result<()>;
}

impl ContainerSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Append-only writer for one container file
pub struct ContainerWriter<S: ContainerSink = File> {
    /// Output file path
    path: PathBuf,
    /// Buffered sink; `None` once closed or poisoned
    writer: Option<BufWriter<S>>,
    /// Length of the header plus every complete block
    committed_len: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
    /// Number of blocks appended
    block_count: u64,
    /// Number of records appended across all blocks
    record_count: u64,
}

impl ContainerWriter<File> {
    /// Create (or truncate) the file at `path` and write the header
    pub fn create(path: &Path, schema: &Schema) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Self::with_sink(path, file, schema)
    }
}

impl<S: ContainerSink> ContainerWriter<S> {
    /// Write the header to an empty `sink`. `path` names the container in
    /// errors and logs.
    pub fn with_sink(path: &Path, sink: S, schema: &Schema) -> Result<Self> {
        let schema_json = schema.to_json()?;
        let schema_len = encode_len(schema_json.len(), "schema")?;

        let mut writer = BufWriter::new(sink);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&schema_len.to_le_bytes())?;
        writer.write_all(schema_json.as_bytes())?;
        writer.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            committed_len: (HEADER_PREFIX_SIZE + schema_json.len()) as u64,
            poisoned: false,
            block_count: 0,
            record_count: 0,
        })
    }

    /// Append one block holding `records` (already encoded)
    pub fn append_batch<R: AsRef<[u8]>>(&mut self, records: &[R]) -> Result<()> {
        if self.writer.is_none() {
            return Err(self.unavailable());
        }

        let payload_len: usize = records.iter().map(|r| 4 + r.as_ref().len()).sum();
        let mut payload = Vec::with_capacity(payload_len);
        for rec in records {
            let bytes = rec.as_ref();
            payload.extend_from_slice(&encode_len(bytes.len(), "record")?.to_le_bytes());
            payload.extend_from_slice(bytes);
        }

        let mut header = [0u8; BLOCK_HEADER_SIZE];
        header[0..4].copy_from_slice(&encode_len(records.len(), "block record count")?.to_le_bytes());
        header[4..8].copy_from_slice(&encode_len(payload.len(), "block")?.to_le_bytes());
        header[8..12].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        let Some(writer) = self.writer.as_mut() else {
            return Err(self.unavailable());
        };
        if let Err(e) = write_block(writer, &header, &payload) {
            self.rollback();
            return Err(e.into());
        }

        self.committed_len += (BLOCK_HEADER_SIZE + payload.len()) as u64;
        self.block_count += 1;
        self.record_count += records.len() as u64;
        Ok(())
    }

    /// Append a single record as a one-element block
    pub fn append(&mut self, record: &[u8]) -> Result<()> {
        self.append_batch(&[record])
    }

    /// Flush, fsync and close the file. Closing twice is a no-op, as is
    /// closing a poisoned container.
    pub fn close(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        let mut sink = writer.into_inner().map_err(|e| {
            ImdsError::Io(io::Error::new(
                e.error().kind(),
                format!("Failed to flush container {}: {}", self.path.display(), e.error()),
            ))
        })?;
        sink.sync()?;
        Ok(())
    }

    /// Drop the unflushed bytes of a failed block and cut the sink back to
    /// the last complete block.
    fn rollback(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let (mut sink, _unflushed) = writer.into_parts();

        let restored = sink
            .truncate(self.committed_len)
            .and_then(|()| sink.seek(SeekFrom::Start(self.committed_len)));
        match restored {
            Ok(_) => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset = self.committed_len,
                    "Discarded partially written block"
                );
                self.writer = Some(BufWriter::new(sink));
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    "Failed to discard partial block, container poisoned: {}",
                    e
                );
                self.poisoned = true;
            }
        }
    }

    fn unavailable(&self) -> ImdsError {
        let state = if self.poisoned { "poisoned" } else { "closed" };
        ImdsError::InvalidState {
            operation: "append to container",
            state: format!("{} ({})", state, self.path.display()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }
}

fn write_block<W: Write>(writer: &mut W, header: &[u8], payload: &[u8]) -> io::Result<()> {
    writer.write_all(header)?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Length prefix for `what`, refusing anything a u32 cannot describe
fn encode_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        ImdsError::Encoding(format!("{} of {} bytes exceeds the container limit", what, len))
    })
}
