//! In-process consumer group.
//!
//! Behaves like a single-member Kafka consumer group over a fixed set of
//! partitions: every session claims all partitions, claims end when the
//! session is rebalanced or cancelled, and marked offsets are recorded so
//! tests can check what was acknowledged. Failures can be injected into the
//! next sessions to exercise retries.

use crate::error::{Error, Result};
use crate::group::{Claim, ConsumerGroup, GroupHandler, SessionInfo};
use async_trait::async_trait;
use span_types::RawMessage;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// An acknowledged message position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark {
    pub partition: i32,
    pub offset: i64,
}

struct MemoryPartition {
    id: i32,
    tx: mpsc::UnboundedSender<RawMessage>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<RawMessage>>>,
    next_offset: StdMutex<i64>,
}

/// In-memory [`ConsumerGroup`] for a single topic.
pub struct MemoryConsumerGroup {
    topic: String,
    partitions: Vec<MemoryPartition>,
    generation: AtomicI32,
    sessions_started: AtomicUsize,
    pending_failures: AtomicU32,
    current_session: StdMutex<Option<CancellationToken>>,
    marks: Arc<StdMutex<Vec<Mark>>>,
}

impl MemoryConsumerGroup {
    pub fn new(topic: impl Into<String>, partitions: i32) -> Self {
        let partitions = (0..partitions)
            .map(|id| {
                let (tx, rx) = mpsc::unbounded_channel();
                MemoryPartition {
                    id,
                    tx,
                    rx: Arc::new(Mutex::new(rx)),
                    next_offset: StdMutex::new(0),
                }
            })
            .collect();

        Self {
            topic: topic.into(),
            partitions,
            generation: AtomicI32::new(0),
            sessions_started: AtomicUsize::new(0),
            pending_failures: AtomicU32::new(0),
            current_session: StdMutex::new(None),
            marks: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append a payload to a partition and return its offset.
    pub fn publish(&self, partition: i32, payload: Vec<u8>) -> Result<i64> {
        let target = self
            .partitions
            .iter()
            .find(|p| p.id == partition)
            .ok_or_else(|| Error::Consumer(format!("Unknown partition {partition}")))?;

        // Offset assignment and enqueue happen under one lock to keep them in order.
        let mut next_offset = target
            .next_offset
            .lock()
            .map_err(|_| Error::Consumer("Partition lock poisoned".to_string()))?;
        let offset = *next_offset;
        target
            .tx
            .send(RawMessage::new(self.topic.clone(), partition, offset, payload))
            .map_err(|_| Error::Consumer(format!("Partition {partition} is closed")))?;
        *next_offset += 1;
        Ok(offset)
    }

    /// Fail the next `count` session attempts before they claim anything.
    pub fn fail_next_sessions(&self, count: u32) {
        self.pending_failures.fetch_add(count, Ordering::SeqCst);
    }

    /// End the current session, as a rebalance would. The next session resumes
    /// with whatever is still queued.
    pub fn rebalance(&self) {
        if let Ok(current) = self.current_session.lock() {
            if let Some(token) = current.as_ref() {
                token.cancel();
            }
        }
    }

    /// Every position marked processed so far, in marking order.
    pub fn marks(&self) -> Vec<Mark> {
        self.marks.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Number of sessions that got as far as claiming partitions.
    pub fn sessions_started(&self) -> usize {
        self.sessions_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerGroup for MemoryConsumerGroup {
    async fn check(&self, topic: &str) -> Result<()> {
        if topic != self.topic {
            return Err(Error::UnknownTopic(topic.to_string()));
        }
        Ok(())
    }

    async fn consume(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        handler: Arc<dyn GroupHandler>,
    ) -> Result<()> {
        self.check(topic).await?;

        if self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Session("injected session failure".to_string()));
        }

        let session_token = cancel.child_token();
        if let Ok(mut current) = self.current_session.lock() {
            *current = Some(session_token.clone());
        }

        let generation_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions_started.fetch_add(1, Ordering::SeqCst);

        let mut claims = BTreeMap::new();
        claims.insert(
            self.topic.clone(),
            self.partitions.iter().map(|p| p.id).collect::<Vec<_>>(),
        );
        let session = Arc::new(SessionInfo::new(generation_id, claims));
        handler.setup(&session);

        let mut tasks = JoinSet::new();
        for partition in &self.partitions {
            let mut claim = MemoryClaim {
                topic: self.topic.clone(),
                partition: partition.id,
                rx: Arc::clone(&partition.rx).lock_owned().await,
                session_token: session_token.clone(),
                marks: Arc::clone(&self.marks),
            };
            let handler = Arc::clone(&handler);
            let session = Arc::clone(&session);
            tasks.spawn(async move { handler.consume_claim(&session, &mut claim).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Claim failed in generation {generation_id}: {e}"),
                Err(e) => error!("Claim task failed in generation {generation_id}: {e}"),
            }
        }

        handler.cleanup(&session);
        if let Ok(mut current) = self.current_session.lock() {
            *current = None;
        }
        debug!("Memory consumer group session {generation_id} finished");
        Ok(())
    }
}

struct MemoryClaim {
    topic: String,
    partition: i32,
    rx: OwnedMutexGuard<mpsc::UnboundedReceiver<RawMessage>>,
    session_token: CancellationToken,
    marks: Arc<StdMutex<Vec<Mark>>>,
}

#[async_trait]
impl Claim for MemoryClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_message(&mut self) -> Option<RawMessage> {
        tokio::select! {
            biased;
            _ = self.session_token.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }

    fn mark_processed(&mut self, message: &RawMessage) {
        if let Ok(mut marks) = self.marks.lock() {
            marks.push(Mark {
                partition: message.partition,
                offset: message.offset,
            });
        }
    }
}
