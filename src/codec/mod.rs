//! Codec Module
//!
//! Schema description and binary encoding of records.
//!
//! ## Responsibilities
//! - Parse a JSON schema description (record name + typed fields)
//! - Validate a record against the schema
//! - Encode records into a compact, schema-ordered binary form (bincode)
//! - Decode that binary form back into records
//!
//! ## Schema Format
//! ```text
//! {
//!   "name": "metrics",
//!   "fields": [
//!     { "name": "id",              "type": "string" },
//!     { "name": "collection_time", "type": "long" },
//!     { "name": "metricdbl1",      "type": "double", "nullable": true }
//!   ]
//! }
//! ```

mod schema;
mod schema_codec;

pub use schema::{Field, FieldType, Schema};
pub use schema_codec::SchemaCodec;
