//! Kafka producer library for testing span-balance
//!
//! This library publishes Avro-encoded spans so consumers can be exercised
//! against a real broker.
//!
//! ## Features
//!
//! - **Avro encoding**: Spans are encoded with the same schema consumers decode
//! - **Trace keyed**: Spans of one trace land on the same partition
//! - **Topic management**: Create topics with a given partition count
//!
//! ## Usage
//!
//! ```rust,no_run
//! use span_balance_kafka_producer::{testdata, SpanProducer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let producer = SpanProducer::new("localhost:9092").await?;
//!
//!     producer.create_topic_if_not_exists("spans", 3).await?;
//!
//!     let span = testdata::random_span(&mut rand::rng());
//!     producer.publish_span("spans", &span).await?;
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use span_types::{Span, SpanEncoder};
use std::time::Duration;

pub mod testdata;

pub use testdata::{publish_test_spans, random_span};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka producer for spans
pub struct SpanProducer {
    producer: FutureProducer,
    encoder: SpanEncoder,
    broker: String,
}

impl SpanProducer {
    /// Create a new span producer
    pub async fn new(broker: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", broker)
            .set("message.timeout.ms", "5000")
            .create()
            .context("Failed to create Kafka producer")?;
        let encoder = SpanEncoder::new().context("Failed to load span schema")?;

        Ok(Self {
            producer,
            encoder,
            broker: broker.to_string(),
        })
    }

    /// Create Kafka topic if it doesn't exist
    pub async fn create_topic_if_not_exists(&self, topic: &str, partitions: i32) -> Result<()> {
        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.broker)
            .create()
            .context("Failed to create admin client")?;

        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(1));
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));

        let results = admin_client
            .create_topics(&[new_topic], &opts)
            .await
            .context("Failed to create topics")?;

        for result in results {
            match result {
                Ok(topic_name) => {
                    tracing::info!("Topic '{topic_name}' created with {partitions} partitions");
                }
                Err((topic_name, err)) if err.to_string().contains("already exists") => {
                    tracing::info!("Topic '{topic_name}' already exists");
                }
                Err((topic_name, err)) => {
                    return Err(anyhow::anyhow!("Failed to create topic '{topic_name}': {err}"));
                }
            }
        }

        Ok(())
    }

    /// Publish a span (Avro encoded), keyed by its trace id
    pub async fn publish_span(&self, topic: &str, span: &Span) -> Result<()> {
        let payload = self
            .encoder
            .encode_span(span)
            .context("Failed to encode span")?;

        self.publish_raw(topic, Some(span.trace.as_bytes()), &payload)
            .await
            .with_context(|| format!("Failed to publish span {}", span.id))?;

        tracing::debug!("Published span {} of trace {}", span.id, span.trace);
        Ok(())
    }

    /// Publish an arbitrary payload, for example one consumers cannot decode
    pub async fn publish_raw(&self, topic: &str, key: Option<&[u8]>, payload: &[u8]) -> Result<()> {
        let mut record = FutureRecord::<[u8], [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(err, _)| err)
            .context("Failed to send message to Kafka")?;

        Ok(())
    }
}
