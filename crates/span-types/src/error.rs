//! Error types for span-types crate.

use thiserror::Error;

/// Errors that can occur while decoding or encoding spans.
#[derive(Error, Debug)]
pub enum SpanTypesError {
    #[error("Avro schema error: {0}")]
    Schema(#[source] apache_avro::Error),

    #[error("Avro decoding error: {0}")]
    AvroDecode(#[source] apache_avro::Error),

    #[error("Avro encoding error: {0}")]
    AvroEncode(#[source] apache_avro::Error),

    #[error("Expected an Avro record, got {0}")]
    NotARecord(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for field '{field}': expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid identifier in field '{field}': expected 8 bytes, got {len}")]
    InvalidIdLength { field: &'static str, len: usize },

    #[error("Invalid value for tag '{key}': expected string")]
    InvalidTag { key: String },

    #[error("{0} unexpected bytes after the span record")]
    TrailingBytes(usize),
}

/// Result type alias for span-types operations.
pub type Result<T> = std::result::Result<T, SpanTypesError>;
