//! Span types.
//!
//! [`RawMessage`] is what the consumer pulls off a partition, [`WireSpan`] is
//! what the Avro schema describes, and [`Span`] is the canonical form handed to
//! callers, with every textual field interned.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Size in bytes of span, parent and trace identifiers on the wire.
pub const ID_LEN: usize = 8;

/// Opaque 8-byte identifier.
///
/// The bytes are carried exactly as they appear on the wire; [`Id::as_u64`]
/// only offers a big-endian view for display and partitioning.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(pub [u8; ID_LEN]);

impl Id {
    pub fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn as_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// An all-zero id marks a missing parent.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; ID_LEN]
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.as_u64())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        // Out of range for i64 nanoseconds only after the year 2262.
        Timestamp(value.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }
}

/// Client/server annotations of a span, each of them optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timings {
    /// Client send
    pub cs: Option<Timestamp>,
    /// Client receive
    pub cr: Option<Timestamp>,
    /// Server send
    pub ss: Option<Timestamp>,
    /// Server receive
    pub sr: Option<Timestamp>,
}

/// A span in its canonical in-memory form.
///
/// Name, service and tags point into the interning table, so equal strings
/// across the whole stream share one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub id: Id,
    pub parent: Id,
    pub trace: Id,
    pub name: Arc<str>,
    pub service: Arc<str>,
    pub timestamp: Timestamp,
    #[serde(serialize_with = "serialize_duration_nanos")]
    pub duration: TimeDelta,
    pub timings: Timings,
    pub tags: HashMap<Arc<str>, Arc<str>>,
}

impl Span {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|value| value.as_ref())
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_zero()
    }
}

fn serialize_duration_nanos<S: Serializer>(
    duration: &TimeDelta,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(duration_nanos(duration))
}

/// Whole nanoseconds in `duration`, saturating at the `i64` bounds.
pub(crate) fn duration_nanos(duration: &TimeDelta) -> i64 {
    duration.num_nanoseconds().unwrap_or(if *duration < TimeDelta::zero() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// A span exactly as the Avro schema lays it out.
///
/// Only lives for the duration of one decode or encode call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireSpan {
    pub id: [u8; ID_LEN],
    pub parent: [u8; ID_LEN],
    pub trace: [u8; ID_LEN],
    pub name: String,
    pub service: String,
    pub timestamp_in_nanos: i64,
    pub duration_in_nanos: i64,
    pub cs_in_nanos: Option<i64>,
    pub cr_in_nanos: Option<i64>,
    pub ss_in_nanos: Option<i64>,
    pub sr_in_nanos: Option<i64>,
    pub tags: HashMap<String, String>,
}

/// A message as pulled from one partition of the source topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Encoded span
    pub payload: Vec<u8>,
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Kafka offset within the partition
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Message timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            payload,
            topic: topic.into(),
            partition,
            offset,
            key: None,
            timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_is_big_endian_hex() {
        let id = Id([0, 0, 0, 0, 0, 0, 0x12, 0xab]);
        assert_eq!(id.to_string(), "00000000000012ab");
        assert_eq!(id.as_u64(), 0x12ab);
        assert_eq!(Id::from_u64(0x12ab), id);
    }

    #[test]
    fn test_zero_parent_is_root() {
        let span = Span {
            id: Id::from_u64(1),
            parent: Id::default(),
            trace: Id::from_u64(1),
            name: Arc::from("get"),
            service: Arc::from("api"),
            timestamp: Timestamp(0),
            duration: TimeDelta::zero(),
            timings: Timings::default(),
            tags: HashMap::new(),
        };
        assert!(span.is_root());
    }

    #[test]
    fn test_span_json_output() {
        let mut tags = HashMap::new();
        tags.insert(Arc::from("http.method"), Arc::from("GET"));
        let span = Span {
            id: Id::from_u64(2),
            parent: Id::from_u64(1),
            trace: Id::from_u64(1),
            name: Arc::from("get /users"),
            service: Arc::from("api"),
            timestamp: Timestamp(1_700_000_000_000_000_000),
            duration: TimeDelta::microseconds(1500),
            timings: Timings {
                sr: Some(Timestamp(1_700_000_000_000_000_000)),
                ..Default::default()
            },
            tags,
        };

        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["id"], "0000000000000002");
        assert_eq!(json["duration"], 1_500_000);
        assert_eq!(json["timings"]["sr"], 1_700_000_000_000_000_000i64);
        assert!(json["timings"]["cs"].is_null());
        assert_eq!(json["tags"]["http.method"], "GET");
    }

    #[test]
    fn test_timestamp_to_datetime() {
        let ts = Timestamp(1_718_451_045_500_000_000);
        let dt = ts.to_datetime();
        assert_eq!(dt.timestamp(), 1_718_451_045);
        assert_eq!(dt.timestamp_subsec_nanos(), 500_000_000);
        assert_eq!(Timestamp::from(dt), ts);
    }
}
