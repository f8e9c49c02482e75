//! Schema-bound binary codec
//!
//! Records are encoded as the list of their values in schema field order,
//! serialized with bincode. Fields the schema does not declare are dropped.

use std::sync::Arc;

use crate::error::{ImdsError, Result};
use crate::record::{Record, Value};

use super::Schema;

/// Encoded in place of absent nullable fields
static NULL: Value = Value::Null;

/// Encodes and decodes records against one fixed schema
#[derive(Debug, Clone)]
pub struct SchemaCodec {
    schema: Arc<Schema>,
}

impl SchemaCodec {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Encode a record
    ///
    /// Fails with `Encoding` if a non-nullable field is missing or any
    /// field holds a value of the wrong type.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let mut values: Vec<&Value> = Vec::with_capacity(self.schema.fields.len());

        for field in &self.schema.fields {
            let value = match record.get(&field.name) {
                None | Some(Value::Null) if field.nullable => &NULL,
                None => {
                    return Err(ImdsError::Encoding(format!(
                        "missing required field '{}' for schema '{}'",
                        field.name, self.schema.name
                    )));
                }
                Some(v) if field.field_type.accepts(v) => v,
                Some(v) => {
                    return Err(ImdsError::Encoding(format!(
                        "field '{}' expects {:?}, got {}",
                        field.name,
                        field.field_type,
                        v.type_name()
                    )));
                }
            };
            values.push(value);
        }

        bincode::serialize(&values).map_err(|e| ImdsError::Encoding(e.to_string()))
    }

    /// Decode bytes produced by `encode` under the same schema
    pub fn decode(&self, bytes: &[u8]) -> Result<Record> {
        let values: Vec<Value> = bincode::deserialize(bytes)
            .map_err(|e| ImdsError::Encoding(format!("Failed to decode record: {}", e)))?;

        if values.len() != self.schema.fields.len() {
            return Err(ImdsError::Encoding(format!(
                "decoded {} values, schema '{}' has {} fields",
                values.len(),
                self.schema.name,
                self.schema.fields.len()
            )));
        }

        let mut record = Record::new();
        for (field, value) in self.schema.fields.iter().zip(values) {
            if matches!(value, Value::Null) && field.nullable {
                continue;
            }
            if !field.field_type.accepts(&value) {
                return Err(ImdsError::Encoding(format!(
                    "decoded field '{}' has type {}, expected {:?}",
                    field.name,
                    value.type_name(),
                    field.field_type
                )));
            }
            record.insert(field.name.clone(), value);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Field, FieldType};

    fn metrics_codec() -> SchemaCodec {
        let schema = Schema::new(
            "metrics",
            vec![
                Field::new("id", FieldType::String),
                Field::new("collection_time", FieldType::Long),
                Field::new("metricdbl1", FieldType::Double).nullable(),
            ],
        )
        .unwrap();
        SchemaCodec::new(schema)
    }

    #[test]
    fn test_encode_decode_full_record() {
        let codec = metrics_codec();
        let rec = Record::new()
            .with("id", "sensor1")
            .with("collection_time", 1_647_106_627_392_928_613i64)
            .with("metricdbl1", 3.5);

        let bytes = codec.encode(&rec).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), rec);
    }

    #[test]
    fn test_nullable_field_may_be_absent() {
        let codec = metrics_codec();
        let rec = Record::new().with("id", "sensor1").with("collection_time", 7i64);

        let decoded = codec.decode(&codec.encode(&rec).unwrap()).unwrap();
        assert_eq!(decoded, rec);
        assert!(decoded.get("metricdbl1").is_none());
    }

    #[test]
    fn test_missing_required_field() {
        let codec = metrics_codec();
        let rec = Record::new().with("id", "sensor1");

        let err = codec.encode(&rec).unwrap_err();
        assert!(matches!(err, ImdsError::Encoding(ref m) if m.contains("collection_time")));
    }

    #[test]
    fn test_type_mismatch() {
        let codec = metrics_codec();
        let rec = Record::new()
            .with("id", "sensor1")
            .with("collection_time", "yesterday");

        assert!(matches!(codec.encode(&rec), Err(ImdsError::Encoding(_))));
    }

    #[test]
    fn test_undeclared_fields_are_dropped() {
        let codec = metrics_codec();
        let rec = Record::new()
            .with("id", "sensor1")
            .with("collection_time", 1i64)
            .with("extra", true);

        let decoded = codec.decode(&codec.encode(&rec).unwrap()).unwrap();
        assert!(decoded.get("extra").is_none());
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_decode_garbage() {
        let codec = metrics_codec();
        assert!(codec.decode(&[0xff, 0x01]).is_err());
    }
}
