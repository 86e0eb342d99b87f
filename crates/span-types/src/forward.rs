//! Forward conversion: Span → WireSpan → Avro bytes.
//!
//! Used by the producer side and by tests that need real payloads.

use crate::error::{Result, SpanTypesError};
use crate::schema::{self, span_schema};
use crate::span::{duration_nanos, Span, WireSpan, ID_LEN};
use apache_avro::types::Value;
use apache_avro::Schema;
use std::collections::HashMap;
use std::sync::Arc;

/// Encodes spans with the span Avro schema.
#[derive(Debug, Clone)]
pub struct SpanEncoder {
    schema: Arc<Schema>,
}

impl SpanEncoder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            schema: Arc::new(span_schema()?),
        })
    }

    /// Encode a wire record as a single Avro datum (no container header).
    pub fn encode(&self, wire: &WireSpan) -> Result<Vec<u8>> {
        apache_avro::to_avro_datum(&self.schema, wire_span_to_value(wire))
            .map_err(SpanTypesError::AvroEncode)
    }

    pub fn encode_span(&self, span: &Span) -> Result<Vec<u8>> {
        self.encode(&WireSpan::from(span))
    }
}

impl From<&Span> for WireSpan {
    fn from(span: &Span) -> Self {
        WireSpan {
            id: span.id.0,
            parent: span.parent.0,
            trace: span.trace.0,
            name: span.name.to_string(),
            service: span.service.to_string(),
            timestamp_in_nanos: span.timestamp.0,
            duration_in_nanos: duration_nanos(&span.duration),
            cs_in_nanos: span.timings.cs.map(|t| t.0),
            cr_in_nanos: span.timings.cr.map(|t| t.0),
            ss_in_nanos: span.timings.ss.map(|t| t.0),
            sr_in_nanos: span.timings.sr.map(|t| t.0),
            tags: span
                .tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Build the Avro value for a wire record, fields in schema order.
pub fn wire_span_to_value(wire: &WireSpan) -> Value {
    let tags: HashMap<String, Value> = wire
        .tags
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    Value::Record(vec![
        (schema::FIELD_ID.to_string(), fixed_id(&wire.id)),
        (schema::FIELD_PARENT.to_string(), fixed_id(&wire.parent)),
        (schema::FIELD_TRACE.to_string(), fixed_id(&wire.trace)),
        (schema::FIELD_NAME.to_string(), Value::String(wire.name.clone())),
        (
            schema::FIELD_SERVICE.to_string(),
            Value::String(wire.service.clone()),
        ),
        (
            schema::FIELD_TIMESTAMP.to_string(),
            Value::Long(wire.timestamp_in_nanos),
        ),
        (
            schema::FIELD_DURATION.to_string(),
            Value::Long(wire.duration_in_nanos),
        ),
        (schema::FIELD_CS.to_string(), optional_long(wire.cs_in_nanos)),
        (schema::FIELD_CR.to_string(), optional_long(wire.cr_in_nanos)),
        (schema::FIELD_SS.to_string(), optional_long(wire.ss_in_nanos)),
        (schema::FIELD_SR.to_string(), optional_long(wire.sr_in_nanos)),
        (schema::FIELD_TAGS.to_string(), Value::Map(tags)),
    ])
}

fn fixed_id(id: &[u8; ID_LEN]) -> Value {
    Value::Fixed(ID_LEN, id.to_vec())
}

fn optional_long(value: Option<i64>) -> Value {
    match value {
        None => Value::Union(0, Box::new(Value::Null)),
        Some(v) => Value::Union(1, Box::new(Value::Long(v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Id, Timestamp, Timings};
    use chrono::TimeDelta;

    fn sample_span() -> Span {
        let mut tags = HashMap::new();
        tags.insert(Arc::from("peer.service"), Arc::from("postgres"));
        Span {
            id: Id::from_u64(42),
            parent: Id::from_u64(7),
            trace: Id::from_u64(7),
            name: Arc::from("select"),
            service: Arc::from("orders"),
            timestamp: Timestamp(1_000_000),
            duration: TimeDelta::milliseconds(3),
            timings: Timings {
                ss: Some(Timestamp(1_003_000)),
                ..Default::default()
            },
            tags,
        }
    }

    #[test]
    fn test_wire_span_from_span() {
        let wire = WireSpan::from(&sample_span());
        assert_eq!(wire.id, 42u64.to_be_bytes());
        assert_eq!(wire.parent, 7u64.to_be_bytes());
        assert_eq!(wire.duration_in_nanos, 3_000_000);
        assert_eq!(wire.ss_in_nanos, Some(1_003_000));
        assert_eq!(wire.cs_in_nanos, None);
        assert_eq!(wire.tags.get("peer.service").map(String::as_str), Some("postgres"));
    }

    #[test]
    fn test_encode_span_produces_datum() {
        let encoder = SpanEncoder::new().unwrap();
        let bytes = tokio_test::assert_ok!(encoder.encode_span(&sample_span()));
        // three 8-byte identifiers lead the record
        assert_eq!(&bytes[..8], &42u64.to_be_bytes());
        assert_eq!(&bytes[8..16], &7u64.to_be_bytes());
        assert_eq!(&bytes[16..24], &7u64.to_be_bytes());
    }

    #[test]
    fn test_optional_long_branches() {
        assert_eq!(optional_long(None), Value::Union(0, Box::new(Value::Null)));
        assert_eq!(
            optional_long(Some(5)),
            Value::Union(1, Box::new(Value::Long(5)))
        );
    }
}
