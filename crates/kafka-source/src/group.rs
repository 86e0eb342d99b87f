//! Capabilities the consumer needs from a group-coordination layer.
//!
//! A [`ConsumerGroup`] runs one session at a time. For every session it calls
//! [`GroupHandler::setup`], runs [`GroupHandler::consume_claim`] once per
//! claimed partition (each in its own task), waits for all of them, then calls
//! [`GroupHandler::cleanup`]. [`crate::KafkaConsumerGroup`] implements this on
//! top of librdkafka, [`crate::MemoryConsumerGroup`] in process.

use crate::error::Result;
use async_trait::async_trait;
use span_types::RawMessage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a session owns: its generation and the partitions it claimed per topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub generation_id: i32,
    pub claims: BTreeMap<String, Vec<i32>>,
}

impl SessionInfo {
    pub fn new(generation_id: i32, claims: BTreeMap<String, Vec<i32>>) -> Self {
        Self {
            generation_id,
            claims,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.claims.values().map(Vec::len).sum()
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation {} (", self.generation_id)?;
        let mut first = true;
        for (topic, partitions) in &self.claims {
            for partition in partitions {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{topic}:{partition}")?;
                first = false;
            }
        }
        write!(f, ")")
    }
}

/// One partition's messages within one session.
#[async_trait]
pub trait Claim: Send {
    fn topic(&self) -> &str;

    fn partition(&self) -> i32;

    /// Wait for the next message in partition order.
    ///
    /// Returns `None` once the partition is revoked or the session ends.
    async fn next_message(&mut self) -> Option<RawMessage>;

    /// Record that `message` has been handled, moving the resume point past it.
    fn mark_processed(&mut self, message: &RawMessage);
}

/// Callbacks a [`ConsumerGroup`] drives during a session.
#[async_trait]
pub trait GroupHandler: Send + Sync {
    /// Called once a session has its claims, before any claim is consumed.
    fn setup(&self, session: &SessionInfo);

    /// Called once every claim of the session has returned.
    fn cleanup(&self, session: &SessionInfo);

    /// Drain one claim. Runs concurrently with the other claims of the session.
    async fn consume_claim(&self, session: &SessionInfo, claim: &mut dyn Claim) -> Result<()>;
}

/// A group-coordination layer that hands out partition claims.
#[async_trait]
pub trait ConsumerGroup: Send + Sync + 'static {
    /// Probe the layer before the first session.
    ///
    /// Errors returned here are startup failures and are not retried.
    async fn check(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    /// Join the group for `topic` and run a single session.
    ///
    /// Blocks for the whole session. Once `cancel` fires the implementation
    /// must stop handing out messages, let in-flight claims return, and return.
    async fn consume(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        handler: Arc<dyn GroupHandler>,
    ) -> Result<()>;
}

#[async_trait]
impl<G: ConsumerGroup + ?Sized> ConsumerGroup for Arc<G> {
    async fn check(&self, topic: &str) -> Result<()> {
        (**self).check(topic).await
    }

    async fn consume(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        handler: Arc<dyn GroupHandler>,
    ) -> Result<()> {
        (**self).consume(cancel, topic, handler).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_info_display() {
        let mut claims = BTreeMap::new();
        claims.insert("spans".to_string(), vec![0, 2]);
        claims.insert("other".to_string(), vec![1]);
        let info = SessionInfo::new(3, claims);

        assert_eq!(info.to_string(), "generation 3 (other:1, spans:0, spans:2)");
        assert_eq!(info.partition_count(), 3);
    }

    #[test]
    fn test_empty_session_info_display() {
        let info = SessionInfo::default();
        assert_eq!(info.to_string(), "generation 0 ()");
        assert_eq!(info.partition_count(), 0);
    }
}
