//! Schema definitions
//!
//! A schema is a named, ordered list of typed fields. It is parsed from JSON
//! and embedded verbatim in every container file header.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ImdsError, Result};
use crate::record::Value;

/// Primitive field types supported by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Long,
    Double,
    Boolean,
    Bytes,
}

impl FieldType {
    /// Whether a non-null value is acceptable for this type
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldType::String, Value::String(_))
                | (FieldType::Long, Value::Long(_))
                | (FieldType::Double, Value::Double(_))
                | (FieldType::Boolean, Value::Bool(_))
                | (FieldType::Bytes, Value::Bytes(_))
        )
    }
}

/// A single schema field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Nullable fields may be absent from a record or hold `Value::Null`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A named, ordered record schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Schema {
    /// Build and validate a schema from parts
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        let schema = Self {
            name: name.into(),
            fields,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Parse and validate a schema from its JSON description
    pub fn parse(json: &str) -> Result<Self> {
        let schema: Schema = serde_json::from_str(json)
            .map_err(|e| ImdsError::Schema(format!("Invalid schema JSON: {}", e)))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Render the schema as compact JSON (embedded in container headers)
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ImdsError::Schema(e.to_string()))
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ImdsError::Schema("schema name is empty".to_string()));
        }
        if self.fields.is_empty() {
            return Err(ImdsError::Schema(format!(
                "schema '{}' declares no fields",
                self.name
            )));
        }

        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(ImdsError::Schema(format!(
                    "schema '{}' has a field with an empty name",
                    self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ImdsError::Schema(format!(
                    "schema '{}' declares field '{}' more than once",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for Schema {
    /// Minimal sensor schema: `id` + `collection_time`
    fn default() -> Self {
        Self {
            name: "record".to_string(),
            fields: vec![
                Field::new("id", FieldType::String),
                Field::new("collection_time", FieldType::Long),
            ],
        }
    }
}
