//! Durable Writers
//!
//! A writer owns exactly one output sink for its whole life and is shut
//! down exactly once, after its persister has drained.

use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::{Schema, SchemaCodec};
use crate::container::{ContainerWriter, FILE_EXTENSION};
use crate::error::{ImdsError, Result};
use crate::serializer::Payload;

/// Durable sink for serialized records
pub trait Writer: Send {
    /// Append one payload
    fn write(&mut self, payload: Payload) -> Result<()>;

    /// Close the sink. Failures are logged, never returned.
    fn shutdown(&mut self);

    /// Backing file, if the sink is file based
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// How a container file is named
#[derive(Debug, Clone)]
pub enum FileName {
    /// `{id}.rec`
    WorkerId(usize),

    /// `{name}.rec`
    Override(String),
}

impl FileName {
    pub fn file_name(&self) -> String {
        match self {
            FileName::WorkerId(id) => format!("{}.{}", id, FILE_EXTENSION),
            FileName::Override(name) => format!("{}.{}", name, FILE_EXTENSION),
        }
    }
}

/// Writes every payload as a one-element block of a container file
pub struct ContainerFileWriter {
    id: usize,
    path: PathBuf,
    codec: SchemaCodec,
    container: ContainerWriter,
}

impl ContainerFileWriter {
    /// Create the output file eagerly, overwriting any existing one.
    ///
    /// Fails if the directory or file cannot be created; the writer is not
    /// usable without its file.
    pub fn create(id: usize, output_dir: &Path, name: FileName, schema: Schema) -> Result<Self> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(name.file_name());
        let container = ContainerWriter::create(&path, &schema)?;

        tracing::debug!(writer_id = id, path = %path.display(), "Created container file");

        Ok(Self {
            id,
            path,
            codec: SchemaCodec::new(schema),
            container,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Records appended so far
    pub fn record_count(&self) -> u64 {
        self.container.record_count()
    }
}

impl Writer for ContainerFileWriter {
    fn write(&mut self, payload: Payload) -> Result<()> {
        if self.container.is_closed() {
            let state = if self.container.is_poisoned() { "poisoned" } else { "shut down" };
            return Err(ImdsError::InvalidState {
                operation: "write",
                state: format!("writer {} {}", self.id, state),
            });
        }
        match payload {
            Payload::Record(record) => {
                let bytes = self.codec.encode(&record)?;
                self.container.append(&bytes)
            }
            Payload::Encoded(bytes) => self.container.append(&bytes),
        }
    }

    fn shutdown(&mut self) {
        if self.container.is_poisoned() {
            tracing::warn!(writer_id = self.id, path = %self.path.display(), "Writer poisoned; nothing to close");
            return;
        }
        if self.container.is_closed() {
            return;
        }
        tracing::info!(
            writer_id = self.id,
            records = self.container.record_count(),
            "Writer shutting down"
        );
        if let Err(e) = self.container.close() {
            tracing::error!(writer_id = self.id, path = %self.path.display(), "Failed to close container: {}", e);
        }
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
