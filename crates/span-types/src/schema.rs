//! The Avro schema spans are published with.

use crate::error::{Result, SpanTypesError};
use apache_avro::Schema;

/// Avro schema of one span record.
///
/// Identifiers are 8-byte `fixed` values, all timestamps and the duration are
/// nanoseconds, and the four client/server annotations are nullable.
pub const SPAN_SCHEMA: &str = r#"
{
  "type": "record",
  "name": "Span",
  "fields": [
    {"name": "id", "type": {"type": "fixed", "name": "Id", "size": 8}},
    {"name": "parent", "type": "Id"},
    {"name": "trace", "type": "Id"},
    {"name": "name", "type": "string"},
    {"name": "service", "type": "string"},
    {"name": "timestampInNanos", "type": "long"},
    {"name": "durationInNanos", "type": "long"},
    {"name": "csInNanos", "type": ["null", "long"], "default": null},
    {"name": "crInNanos", "type": ["null", "long"], "default": null},
    {"name": "ssInNanos", "type": ["null", "long"], "default": null},
    {"name": "srInNanos", "type": ["null", "long"], "default": null},
    {"name": "tags", "type": {"type": "map", "values": "string"}}
  ]
}
"#;

pub(crate) const FIELD_ID: &str = "id";
pub(crate) const FIELD_PARENT: &str = "parent";
pub(crate) const FIELD_TRACE: &str = "trace";
pub(crate) const FIELD_NAME: &str = "name";
pub(crate) const FIELD_SERVICE: &str = "service";
pub(crate) const FIELD_TIMESTAMP: &str = "timestampInNanos";
pub(crate) const FIELD_DURATION: &str = "durationInNanos";
pub(crate) const FIELD_CS: &str = "csInNanos";
pub(crate) const FIELD_CR: &str = "crInNanos";
pub(crate) const FIELD_SS: &str = "ssInNanos";
pub(crate) const FIELD_SR: &str = "srInNanos";
pub(crate) const FIELD_TAGS: &str = "tags";

/// Parse [`SPAN_SCHEMA`].
pub fn span_schema() -> Result<Schema> {
    Schema::parse_str(SPAN_SCHEMA).map_err(SpanTypesError::Schema)
}
