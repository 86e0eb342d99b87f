//! Resilient Kafka consumer for span streams.
//!
//! This crate provides:
//! - A consumer group abstraction ([`ConsumerGroup`], [`GroupHandler`], [`Claim`])
//!   with a librdkafka implementation and an in-process one for tests
//! - [`SpanGroupHandler`], which decodes every message into an interned
//!   [`Span`] and acknowledges it only after the callback returned
//! - [`Supervisor`], which keeps sessions running across failures and
//!   rebalances until [`StopHandle::stop`] is called
//!
//! # Example
//!
//! ```no_run
//! use span_balance_kafka_source::{
//!     ConsumerConfig, KafkaConsumerGroup, SpanDecoder, SpanGroupHandler, Supervisor,
//! };
//! use std::sync::Arc;
//!
//! # async fn run(config: ConsumerConfig) -> span_balance_kafka_source::Result<()> {
//! let group = KafkaConsumerGroup::new(&config)?;
//! let handler = SpanGroupHandler::from_fn(SpanDecoder::new()?, |span| {
//!     println!("{} {}", span.service, span.name);
//! });
//!
//! let handle = Supervisor::new(group, config.topic.clone(), Arc::new(handler))
//!     .with_retry_policy(config.retry_policy())
//!     .start()
//!     .await?;
//!
//! tokio::signal::ctrl_c().await.ok();
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod group;
pub mod handler;
pub mod kafka;
pub mod memory;
pub mod supervisor;

pub use config::ConsumerConfig;
pub use error::{Error, Result};
pub use group::{Claim, ConsumerGroup, GroupHandler, SessionInfo};
pub use handler::{SpanCallback, SpanGroupHandler};
pub use kafka::KafkaConsumerGroup;
pub use memory::{Mark, MemoryConsumerGroup};
pub use supervisor::{RetryPolicy, StopHandle, Supervisor, SupervisorState};

pub use span_types::{Id, RawMessage, Span, SpanDecoder, Timestamp, Timings};
