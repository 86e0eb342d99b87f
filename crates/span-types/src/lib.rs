//! Span type library for span-balance.
//!
//! This crate holds everything that describes a span independently of Kafka:
//! the Avro wire schema, the decoded in-memory form, and the string interning
//! table that keeps repeated names and tags from being allocated per span.
//!
//! # Architecture
//!
//! ```text
//! Forward (Producer):  Span → WireSpan → Avro bytes
//! Reverse (Consumer):  Avro bytes → WireSpan → Span (interned)
//! ```
//!
//! # Modules
//!
//! - [`span`] - Span, WireSpan and RawMessage types
//! - [`schema`] - The Avro schema spans are published with
//! - [`reverse`] - Avro → Span decoding
//! - [`forward`] - Span → Avro encoding
//! - [`intern`] - Concurrent string interning table
//! - [`error`] - Error types for decoding and encoding
//!
//! # Example
//!
//! ```ignore
//! use span_types::{SpanDecoder, SpanEncoder};
//!
//! let bytes = SpanEncoder::new()?.encode_span(&span)?;
//! let decoded = SpanDecoder::new()?.decode(&bytes)?;
//! ```

pub mod error;
pub mod forward;
pub mod intern;
pub mod reverse;
pub mod schema;
pub mod span;

pub use error::{Result, SpanTypesError};
pub use forward::{wire_span_to_value, SpanEncoder};
pub use intern::{global_interner, intern, Interner};
pub use reverse::{value_to_wire_span, SpanDecoder};
pub use schema::{span_schema, SPAN_SCHEMA};
pub use span::{Id, RawMessage, Span, Timestamp, Timings, WireSpan, ID_LEN};

// Span durations are signed; callers building spans need the type.
pub use chrono::TimeDelta;
