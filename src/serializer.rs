//! Serializers
//!
//! Turn a record into whatever its writer consumes: either the record
//! itself (no-op) or schema-encoded bytes.

use std::sync::Arc;

use bytes::Bytes;

use crate::codec::{Schema, SchemaCodec};
use crate::error::Result;
use crate::record::Record;

/// Output of a serializer, input of a writer
#[derive(Debug, Clone)]
pub enum Payload {
    /// A structured record, for writers that encode natively
    Record(Arc<Record>),

    /// Bytes already encoded against the writer's schema
    Encoded(Bytes),
}

/// Converts records into writer payloads
pub trait Serializer: Send {
    fn serialize(&self, record: Arc<Record>) -> Result<Payload>;
}

/// Which serializer a store builds for its persisters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializerKind {
    /// Hand records to the writer unchanged
    Noop,

    /// Encode records against the configured schema before writing
    #[default]
    Schema,
}

/// Pass-through serializer
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSerializer;

impl NoopSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for NoopSerializer {
    fn serialize(&self, record: Arc<Record>) -> Result<Payload> {
        Ok(Payload::Record(record))
    }
}

/// Binary-encodes records against a fixed schema
#[derive(Debug, Clone)]
pub struct SchemaSerializer {
    codec: SchemaCodec,
}

impl SchemaSerializer {
    pub fn new(schema: Schema) -> Self {
        Self {
            codec: SchemaCodec::new(schema),
        }
    }
}

impl Serializer for SchemaSerializer {
    fn serialize(&self, record: Arc<Record>) -> Result<Payload> {
        let bytes = self.codec.encode(&record)?;
        Ok(Payload::Encoded(Bytes::from(bytes)))
    }
}

/// Build the serializer selected by `kind`
pub fn build_serializer(kind: SerializerKind, schema: &Schema) -> Box<dyn Serializer> {
    match kind {
        SerializerKind::Noop => Box::new(NoopSerializer::new()),
        SerializerKind::Schema => Box::new(SchemaSerializer::new(schema.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImdsError;

    #[test]
    fn test_noop_passes_record_through() {
        let rec = Arc::new(Record::new().with("id", "a"));
        match NoopSerializer::new().serialize(Arc::clone(&rec)).unwrap() {
            Payload::Record(out) => assert!(Arc::ptr_eq(&out, &rec)),
            Payload::Encoded(_) => panic!("noop serializer must not encode"),
        }
    }

    #[test]
    fn test_schema_serializer_encodes() {
        let schema = Schema::default();
        let rec = Arc::new(Record::new().with("id", "a").with("collection_time", 5i64));

        let payload = SchemaSerializer::new(schema.clone()).serialize(rec.clone()).unwrap();
        let Payload::Encoded(bytes) = payload else {
            panic!("expected encoded payload");
        };
        assert_eq!(SchemaCodec::new(schema).decode(&bytes).unwrap(), *rec);
    }

    #[test]
    fn test_schema_serializer_surfaces_encoding_error() {
        let rec = Arc::new(Record::new().with("id", "a"));
        let result = SchemaSerializer::new(Schema::default()).serialize(rec);
        assert!(matches!(result, Err(ImdsError::Encoding(_))));
    }
}
