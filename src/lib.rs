//! span-balance library
//!
//! Command-line options and span output for the `span-balance` binary. The
//! consumer itself lives in `span_balance_kafka_source`, the span types in
//! `span_types`.
//!
//! # CLI Usage
//!
//! ```bash
//! # Print every span of a topic as a JSON line until Ctrl-C
//! span-balance consume --brokers localhost:9092 --topic spans
//!
//! # Publish 10000 random spans to a 6 partition topic
//! span-balance populate --brokers localhost:9092 --topic spans --count 10000 --partitions 6
//! ```

use clap::{Parser, ValueEnum};

pub mod output;

pub use output::SpanPrinter;
pub use span_balance_kafka_producer as producer;
pub use span_balance_kafka_source as source;
pub use span_balance_kafka_source::ConsumerConfig;

/// How consumed spans are written to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Nothing, only the total at shutdown
    None,
}

#[derive(Parser, Debug, Clone)]
pub struct ConsumeArgs {
    #[command(flatten)]
    pub consumer: ConsumerConfig,

    /// Output format for consumed spans
    #[arg(long, value_enum, default_value = "json")]
    pub output: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct PopulateArgs {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[arg(long, value_delimiter = ',', required = true, env = "KAFKA_BROKERS")]
    pub brokers: Vec<String>,

    /// Topic to publish spans to
    #[arg(long, env = "KAFKA_TOPIC")]
    pub topic: String,

    /// Number of spans to publish
    #[arg(long, default_value = "1000")]
    pub count: usize,

    /// Partitions to create the topic with, if it does not exist
    #[arg(long, default_value = "3")]
    pub partitions: i32,
}

impl PopulateArgs {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}
