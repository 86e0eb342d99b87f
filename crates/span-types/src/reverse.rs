//! Reverse conversion: Avro bytes → WireSpan → Span.
//!
//! Decoding is strict: a record that is missing a field, carries the wrong Avro
//! type, or has an identifier of the wrong size is rejected as a whole.

use crate::error::{Result, SpanTypesError};
use crate::intern::{global_interner, Interner};
use crate::schema::{self, span_schema};
use crate::span::{Id, Span, Timestamp, Timings, WireSpan, ID_LEN};
use apache_avro::types::Value;
use apache_avro::Schema;
use chrono::TimeDelta;
use std::collections::HashMap;
use std::sync::Arc;

/// Decodes Avro span payloads into interned [`Span`]s.
///
/// Cheap to clone; clones share the parsed schema and the interning table.
#[derive(Debug, Clone)]
pub struct SpanDecoder {
    schema: Arc<Schema>,
    interner: Arc<Interner>,
}

impl SpanDecoder {
    /// Create a decoder backed by the process-wide interning table.
    pub fn new() -> Result<Self> {
        Self::with_interner(global_interner())
    }

    /// Create a decoder backed by the given interning table.
    pub fn with_interner(interner: Arc<Interner>) -> Result<Self> {
        Ok(Self {
            schema: Arc::new(span_schema()?),
            interner,
        })
    }

    pub fn interner(&self) -> &Arc<Interner> {
        &self.interner
    }

    /// Decode a payload into its canonical span.
    pub fn decode(&self, payload: &[u8]) -> Result<Span> {
        let wire = self.decode_wire(payload)?;
        self.internalize(wire)
    }

    /// Decode a payload into the plain wire record, without interning.
    ///
    /// The payload must hold exactly one record.
    pub fn decode_wire(&self, payload: &[u8]) -> Result<WireSpan> {
        let mut reader = payload;
        let value = apache_avro::from_avro_datum(&self.schema, &mut reader, None)
            .map_err(SpanTypesError::AvroDecode)?;
        if !reader.is_empty() {
            return Err(SpanTypesError::TrailingBytes(reader.len()));
        }
        value_to_wire_span(value)
    }

    fn internalize(&self, wire: WireSpan) -> Result<Span> {
        let tags = wire
            .tags
            .into_iter()
            .map(|(key, value)| (self.interner.intern_owned(key), self.interner.intern_owned(value)))
            .collect();

        Ok(Span {
            id: Id(wire.id),
            parent: Id(wire.parent),
            trace: Id(wire.trace),
            name: self.interner.intern_owned(wire.name),
            service: self.interner.intern_owned(wire.service),
            timestamp: Timestamp(wire.timestamp_in_nanos),
            duration: TimeDelta::nanoseconds(wire.duration_in_nanos),
            timings: Timings {
                cs: wire.cs_in_nanos.map(Timestamp),
                cr: wire.cr_in_nanos.map(Timestamp),
                ss: wire.ss_in_nanos.map(Timestamp),
                sr: wire.sr_in_nanos.map(Timestamp),
            },
            tags,
        })
    }
}

/// Convert a decoded Avro value into a [`WireSpan`].
pub fn value_to_wire_span(value: Value) -> Result<WireSpan> {
    let fields = match value {
        Value::Record(fields) => fields,
        other => return Err(SpanTypesError::NotARecord(format!("{other:?}"))),
    };

    let mut fields: HashMap<String, Value> = fields.into_iter().collect();
    let mut take = |name: &'static str| {
        fields
            .remove(name)
            .ok_or(SpanTypesError::MissingField(name))
    };

    Ok(WireSpan {
        id: to_id(schema::FIELD_ID, take(schema::FIELD_ID)?)?,
        parent: to_id(schema::FIELD_PARENT, take(schema::FIELD_PARENT)?)?,
        trace: to_id(schema::FIELD_TRACE, take(schema::FIELD_TRACE)?)?,
        name: to_string(schema::FIELD_NAME, take(schema::FIELD_NAME)?)?,
        service: to_string(schema::FIELD_SERVICE, take(schema::FIELD_SERVICE)?)?,
        timestamp_in_nanos: to_long(schema::FIELD_TIMESTAMP, take(schema::FIELD_TIMESTAMP)?)?,
        duration_in_nanos: to_long(schema::FIELD_DURATION, take(schema::FIELD_DURATION)?)?,
        cs_in_nanos: to_optional_long(schema::FIELD_CS, take(schema::FIELD_CS)?)?,
        cr_in_nanos: to_optional_long(schema::FIELD_CR, take(schema::FIELD_CR)?)?,
        ss_in_nanos: to_optional_long(schema::FIELD_SS, take(schema::FIELD_SS)?)?,
        sr_in_nanos: to_optional_long(schema::FIELD_SR, take(schema::FIELD_SR)?)?,
        tags: to_tags(take(schema::FIELD_TAGS)?)?,
    })
}

fn to_id(field: &'static str, value: Value) -> Result<[u8; ID_LEN]> {
    match value {
        Value::Fixed(_, bytes) => <[u8; ID_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            SpanTypesError::InvalidIdLength {
                field,
                len: bytes.len(),
            }
        }),
        _ => Err(SpanTypesError::InvalidField {
            field,
            expected: "fixed(8)",
        }),
    }
}

fn to_string(field: &'static str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(SpanTypesError::InvalidField {
            field,
            expected: "string",
        }),
    }
}

fn to_long(field: &'static str, value: Value) -> Result<i64> {
    match value {
        Value::Long(v) => Ok(v),
        _ => Err(SpanTypesError::InvalidField {
            field,
            expected: "long",
        }),
    }
}

fn to_optional_long(field: &'static str, value: Value) -> Result<Option<i64>> {
    match value {
        Value::Union(_, inner) => match *inner {
            Value::Null => Ok(None),
            Value::Long(v) => Ok(Some(v)),
            _ => Err(SpanTypesError::InvalidField {
                field,
                expected: "null or long",
            }),
        },
        Value::Null => Ok(None),
        Value::Long(v) => Ok(Some(v)),
        _ => Err(SpanTypesError::InvalidField {
            field,
            expected: "null or long",
        }),
    }
}

fn to_tags(value: Value) -> Result<HashMap<String, String>> {
    let entries = match value {
        Value::Map(entries) => entries,
        _ => {
            return Err(SpanTypesError::InvalidField {
                field: schema::FIELD_TAGS,
                expected: "map<string>",
            })
        }
    };

    entries
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(value) => Ok((key, value)),
            _ => Err(SpanTypesError::InvalidTag { key }),
        })
        .collect()
}
