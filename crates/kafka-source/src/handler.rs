//! Claim processing and session observation for span consumption.

use crate::error::Result;
use crate::group::{Claim, GroupHandler, SessionInfo};
use async_trait::async_trait;
use span_types::{Span, SpanDecoder};
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback invoked once per decoded span.
///
/// With several claims active it is called from several tasks at once, so it
/// must do its own synchronization. It runs inline on the claim's task: a slow
/// callback slows down its partition.
pub type SpanCallback = Arc<dyn Fn(Span) + Send + Sync>;

/// [`GroupHandler`] that decodes every message of a claim into a [`Span`],
/// hands it to the callback, and only then marks the message processed.
///
/// Messages that fail to decode are logged and skipped without being marked.
#[derive(Clone)]
pub struct SpanGroupHandler {
    decoder: SpanDecoder,
    callback: SpanCallback,
}

impl SpanGroupHandler {
    pub fn new(decoder: SpanDecoder, callback: SpanCallback) -> Self {
        Self { decoder, callback }
    }

    pub fn from_fn<F>(decoder: SpanDecoder, callback: F) -> Self
    where
        F: Fn(Span) + Send + Sync + 'static,
    {
        Self::new(decoder, Arc::new(callback))
    }
}

#[async_trait]
impl GroupHandler for SpanGroupHandler {
    fn setup(&self, session: &SessionInfo) {
        debug!(
            "Member of consumer group with generation id {}",
            session.generation_id
        );
        for (topic, partitions) in &session.claims {
            for partition in partitions {
                debug!("  * claimed {topic}:{partition}");
            }
        }
    }

    fn cleanup(&self, session: &SessionInfo) {
        debug!(
            "Consumer group session with generation id {} ended",
            session.generation_id
        );
    }

    async fn consume_claim(&self, _session: &SessionInfo, claim: &mut dyn Claim) -> Result<()> {
        while let Some(message) = claim.next_message().await {
            let span = match self.decoder.decode(&message.payload) {
                Ok(span) => span,
                Err(e) => {
                    warn!(
                        "Cannot deserialize kafka message {}:{}@{}: {e}",
                        message.topic, message.partition, message.offset
                    );
                    continue;
                }
            };

            (self.callback)(span);

            claim.mark_processed(&message);
        }

        debug!("Claim {}:{} closed", claim.topic(), claim.partition());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use span_types::{Id, Interner, RawMessage, SpanEncoder, TimeDelta, Timestamp, Timings};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Step {
        Handled(u64),
        Marked(i64),
    }

    struct ScriptedClaim {
        messages: VecDeque<RawMessage>,
        log: Arc<Mutex<Vec<Step>>>,
    }

    #[async_trait]
    impl Claim for ScriptedClaim {
        fn topic(&self) -> &str {
            "spans"
        }

        fn partition(&self) -> i32 {
            0
        }

        async fn next_message(&mut self) -> Option<RawMessage> {
            self.messages.pop_front()
        }

        fn mark_processed(&mut self, message: &RawMessage) {
            self.log.lock().unwrap().push(Step::Marked(message.offset));
        }
    }

    fn span_payload(id: u64) -> Vec<u8> {
        let span = Span {
            id: Id::from_u64(id),
            parent: Id::default(),
            trace: Id::from_u64(id),
            name: Arc::from("op"),
            service: Arc::from("svc"),
            timestamp: Timestamp(0),
            duration: TimeDelta::nanoseconds(1),
            timings: Timings::default(),
            tags: HashMap::new(),
        };
        SpanEncoder::new().unwrap().encode_span(&span).unwrap()
    }

    fn handler(log: Arc<Mutex<Vec<Step>>>) -> SpanGroupHandler {
        let decoder = SpanDecoder::with_interner(Arc::new(Interner::new())).unwrap();
        SpanGroupHandler::from_fn(decoder, move |span: Span| {
            log.lock().unwrap().push(Step::Handled(span.id.as_u64()));
        })
    }

    #[tokio::test]
    async fn test_handles_then_marks_each_message_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut claim = ScriptedClaim {
            messages: (0..3)
                .map(|i| RawMessage::new("spans", 0, i, span_payload(i as u64 + 100)))
                .collect(),
            log: Arc::clone(&log),
        };

        handler(Arc::clone(&log))
            .consume_claim(&SessionInfo::default(), &mut claim)
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Step::Handled(100),
                Step::Marked(0),
                Step::Handled(101),
                Step::Marked(1),
                Step::Handled(102),
                Step::Marked(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped_without_mark() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut claim = ScriptedClaim {
            messages: VecDeque::from(vec![
                RawMessage::new("spans", 0, 0, span_payload(1)),
                RawMessage::new("spans", 0, 1, b"not avro".to_vec()),
                RawMessage::new("spans", 0, 2, span_payload(3)),
            ]),
            log: Arc::clone(&log),
        };

        handler(Arc::clone(&log))
            .consume_claim(&SessionInfo::default(), &mut claim)
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Step::Handled(1),
                Step::Marked(0),
                Step::Handled(3),
                Step::Marked(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_claim_returns_ok() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut claim = ScriptedClaim {
            messages: VecDeque::new(),
            log: Arc::clone(&log),
        };

        let result = handler(Arc::clone(&log))
            .consume_claim(&SessionInfo::default(), &mut claim)
            .await;

        tokio_test::assert_ok!(result);
        assert!(log.lock().unwrap().is_empty());
    }
}
