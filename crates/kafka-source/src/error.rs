use span_types::SpanTypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Span decode error: {0}")]
    Decode(#[from] SpanTypesError),

    #[error("Consumer group session error: {0}")]
    Session(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
