//! Container Reader
//!
//! Opens a container file, validates its header and iterates the records of
//! every block in append order.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::codec::{Schema, SchemaCodec};
use crate::error::{ImdsError, Result};
use crate::record::Record;

use super::{BLOCK_HEADER_SIZE, HEADER_PREFIX_SIZE, MAGIC, VERSION};

/// Sequential reader over one container file
pub struct ContainerReader {
    path: PathBuf,
    file: BufReader<File>,
    /// Codec built from the schema embedded in the header
    codec: SchemaCodec,
    /// Decoded records of the current block not yet yielded
    pending: VecDeque<Record>,
    /// Set after EOF or the first error
    done: bool,
}

impl ContainerReader {
    /// Open a container file and parse its header
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);

        let mut prefix = [0u8; HEADER_PREFIX_SIZE];
        file.read_exact(&mut prefix).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ImdsError::Corruption(format!(
                "{}: file too short for container header",
                path.display()
            )),
            _ => ImdsError::Io(e),
        })?;

        if &prefix[0..4] != MAGIC {
            return Err(ImdsError::Corruption(format!(
                "{}: invalid magic {:?}",
                path.display(),
                &prefix[0..4]
            )));
        }

        let version = u16::from_le_bytes([prefix[4], prefix[5]]);
        if version != VERSION {
            return Err(ImdsError::Corruption(format!(
                "{}: unsupported container version {}",
                path.display(),
                version
            )));
        }

        let schema_len = u32::from_le_bytes([prefix[6], prefix[7], prefix[8], prefix[9]]) as usize;
        let mut schema_json = vec![0u8; schema_len];
        file.read_exact(&mut schema_json)?;
        let schema_json = String::from_utf8(schema_json).map_err(|e| {
            ImdsError::Corruption(format!("{}: schema is not UTF-8: {}", path.display(), e))
        })?;
        let schema = Schema::parse(&schema_json)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            codec: SchemaCodec::new(schema),
            pending: VecDeque::new(),
            done: false,
        })
    }

    /// Schema embedded in this file's header
    pub fn schema(&self) -> &Schema {
        self.codec.schema()
    }

    /// Read and decode the next block into `pending`.
    ///
    /// Returns `Ok(false)` on a clean EOF at a block boundary.
    fn read_block(&mut self) -> Result<bool> {
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        let mut filled = 0;
        while filled < BLOCK_HEADER_SIZE {
            match self.file.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(ImdsError::Corruption(format!(
                        "{}: truncated block header",
                        self.path.display()
                    )));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let payload_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let mut payload = vec![0u8; payload_len];
        self.file.read_exact(&mut payload).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ImdsError::Corruption(format!(
                "{}: truncated block payload",
                self.path.display()
            )),
            _ => ImdsError::Io(e),
        })?;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            return Err(ImdsError::Corruption(format!(
                "{}: block CRC mismatch (expected {:08x}, got {:08x})",
                self.path.display(),
                expected_crc,
                actual_crc
            )));
        }

        let mut pos = 0;
        for _ in 0..count {
            if pos + 4 > payload.len() {
                return Err(ImdsError::Corruption(format!(
                    "{}: block shorter than its record count",
                    self.path.display()
                )));
            }
            let len = u32::from_le_bytes([
                payload[pos],
                payload[pos + 1],
                payload[pos + 2],
                payload[pos + 3],
            ]) as usize;
            pos += 4;
            if pos + len > payload.len() {
                return Err(ImdsError::Corruption(format!(
                    "{}: record overruns its block",
                    self.path.display()
                )));
            }
            self.pending.push_back(self.codec.decode(&payload[pos..pos + len])?);
            pos += len;
        }
        Ok(true)
    }
}

impl Iterator for ContainerReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rec) = self.pending.pop_front() {
                return Some(Ok(rec));
            }
            if self.done {
                return None;
            }
            match self.read_block() {
                Ok(true) => continue,
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;
    use crate::container::ContainerWriter;

    fn sample(id: &str, ts: i64) -> Record {
        Record::new().with("id", id).with("collection_time", ts)
    }

    fn write_file(dir: &TempDir, records: &[Record]) -> PathBuf {
        let path = dir.path().join("0.rec");
        let codec = SchemaCodec::new(Schema::default());
        let mut writer = ContainerWriter::create(&path, codec.schema()).unwrap();
        for rec in records {
            writer.append(&codec.encode(rec).unwrap()).unwrap();
        }
        writer.close().unwrap();
        path
    }

    #[test]
    fn test_reads_back_in_append_order() {
        let dir = TempDir::new().unwrap();
        let records = vec![sample("a", 1), sample("b", 2), sample("a", 3)];
        let path = write_file(&dir, &records);

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.schema(), &Schema::default());
        let read: Vec<Record> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn test_empty_container_has_no_records() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, &[]);

        assert_eq!(ContainerReader::open(&path).unwrap().count(), 0);
    }

    #[test]
    fn test_multi_record_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.rec");
        let codec = SchemaCodec::new(Schema::default());
        let mut writer = ContainerWriter::create(&path, codec.schema()).unwrap();
        let batch: Vec<Vec<u8>> = (0..3)
            .map(|i| codec.encode(&sample("k", i)).unwrap())
            .collect();
        writer.append_batch(&batch).unwrap();
        writer.close().unwrap();

        assert_eq!(writer.block_count(), 1);
        assert_eq!(writer.record_count(), 3);
        let read = ContainerReader::open(&path).unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[2].timestamp("collection_time"), Some(2));
    }

    #[test]
    fn test_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.rec");
        std::fs::write(&path, b"NOPE\x01\x00\x00\x00\x00\x00").unwrap();

        assert!(matches!(
            ContainerReader::open(&path),
            Err(ImdsError::Corruption(_))
        ));
    }

    #[test]
    fn test_truncated_block_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, &[sample("a", 1)]);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[1, 0, 0, 0, 50]).unwrap();

        let results: Vec<Result<Record>> = ContainerReader::open(&path).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ImdsError::Corruption(_))));
    }

    #[test]
    fn test_crc_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, &[sample("a", 1)]);

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let mut reader = ContainerReader::open(&path).unwrap();
        assert!(matches!(reader.next(), Some(Err(ImdsError::Corruption(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_append_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("closed.rec");
        let mut writer = ContainerWriter::create(&path, &Schema::default()).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();

        assert!(writer.is_closed());
        assert!(matches!(
            writer.append(b"x"),
            Err(ImdsError::InvalidState { .. })
        ));
    }
}
