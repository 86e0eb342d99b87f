//! [`ConsumerGroup`] backed by an rdkafka `StreamConsumer`.
//!
//! A session starts once the group has assigned partitions to this member and
//! ends at the next rebalance, on a consumer error, or on cancellation. Within
//! a session every assigned partition gets a bounded channel and its own claim
//! task; the consumer loop only routes messages into those channels.
//!
//! Offsets are stored (not committed) when a claim marks a message processed,
//! with `enable.auto.offset.store=false`, so the periodic auto commit only ever
//! covers messages that were actually handled.
//!
//! When a session ends while the member keeps its partitions, the consumer has
//! already fetched past messages that never reached the handler (still queued
//! in a claim channel, or in flight when the claim stopped). Every such
//! partition is seeked back to its first unhandled offset before the next
//! session starts.

use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::group::{Claim, ConsumerGroup, GroupHandler, SessionInfo};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::Message;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use span_types::RawMessage;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type TopicPartition = (String, i32);

/// Rebalance notifications forwarded from librdkafka callbacks.
#[derive(Debug)]
enum RebalanceEvent {
    Assign(Vec<TopicPartition>),
    Revoke(Vec<TopicPartition>),
    Error(String),
}

/// Consumer context that forwards rebalances to the session loop.
pub struct SessionContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
}

impl SessionContext {
    fn forward(&self, event: RebalanceEvent) {
        if let Err(e) = self.events.send(event) {
            warn!("Dropping rebalance event, session loop is gone: {:?}", e.0);
        }
    }
}

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                info!("Revoking {} partitions", partitions.count());
                self.forward(RebalanceEvent::Revoke(topic_partitions(partitions)));
            }
            Rebalance::Assign(partitions) => {
                debug!("Pre-rebalance assign event for {} partitions", partitions.count());
            }
            Rebalance::Error(e) => {
                error!("Rebalance error: {e}");
                self.forward(RebalanceEvent::Error(e.to_string()));
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                info!("Assigned {} partitions", partitions.count());
                self.forward(RebalanceEvent::Assign(topic_partitions(partitions)));
            }
            Rebalance::Revoke(_) => {
                debug!("Post-rebalance revoke event");
            }
            Rebalance::Error(e) => {
                error!("Post-rebalance error: {e}");
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!("Committed offsets for {} partitions", offsets.count()),
            Err(e) => warn!("Failed to commit offsets: {e}"),
        }
    }
}

type SpanStreamConsumer = StreamConsumer<SessionContext>;

/// Per-group state only touched by the session that is running.
struct SessionState {
    events: mpsc::UnboundedReceiver<RebalanceEvent>,
    subscription: Option<String>,
}

/// Kafka consumer group member.
pub struct KafkaConsumerGroup {
    consumer: Arc<SpanStreamConsumer>,
    state: Mutex<SessionState>,
    generation: AtomicI32,
    claim_buffer_size: usize,
    metadata_timeout: Duration,
}

enum Step {
    Route(RawMessage),
    Skip,
    End(Result<()>),
}

const NOTHING_MARKED: i64 = -1;

/// How far one claim got through the messages routed to it.
#[derive(Debug)]
struct ClaimProgress {
    /// First and last offsets routed this session.
    routed: Option<(i64, i64)>,
    /// One past the last offset the claim marked processed.
    marked: Arc<AtomicI64>,
}

impl ClaimProgress {
    fn new() -> Self {
        Self {
            routed: None,
            marked: Arc::new(AtomicI64::new(NOTHING_MARKED)),
        }
    }

    fn routed(&mut self, offset: i64) {
        self.routed = Some(match self.routed {
            None => (offset, offset),
            Some((first, last)) => (first.min(offset), last.max(offset)),
        });
    }

    /// The first routed offset the claim never got to, if any.
    fn resume_point(&self) -> Option<i64> {
        let (first, last) = self.routed?;
        match self.marked.load(Ordering::SeqCst) {
            NOTHING_MARKED => Some(first),
            marked => (marked <= last).then_some(marked),
        }
    }
}

/// Routing target for one claimed partition.
struct ClaimRoute {
    sender: mpsc::Sender<RawMessage>,
    progress: ClaimProgress,
}

/// Lowest offset each partition has to be read again from.
#[derive(Debug, Default, PartialEq)]
struct ResumePoints(BTreeMap<TopicPartition, i64>);

impl ResumePoints {
    fn note(&mut self, partition: TopicPartition, offset: i64) {
        self.0
            .entry(partition)
            .and_modify(|current| *current = (*current).min(offset))
            .or_insert(offset);
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl KafkaConsumerGroup {
    /// Create the underlying consumer. Does not contact the brokers yet.
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let consumer: SpanStreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create_with_context(SessionContext { events: events_tx })
            .map_err(|e| Error::Consumer(format!("Failed to create consumer: {e}")))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            state: Mutex::new(SessionState {
                events: events_rx,
                subscription: None,
            }),
            generation: AtomicI32::new(0),
            claim_buffer_size: config.claim_buffer_size,
            metadata_timeout: config.metadata_timeout(),
        })
    }

    /// Get the underlying consumer (for advanced use cases)
    pub fn inner(&self) -> &SpanStreamConsumer {
        &self.consumer
    }

    fn assigned_partitions(&self) -> Result<Vec<TopicPartition>> {
        Ok(topic_partitions(&self.consumer.assignment()?))
    }

    async fn route(
        &self,
        cancel: &CancellationToken,
        claims: &mut HashMap<TopicPartition, ClaimRoute>,
        unclaimed: &mut ResumePoints,
        message: RawMessage,
    ) {
        let key = (message.topic.clone(), message.partition);
        let Some(claim) = claims.get_mut(&key) else {
            warn!(
                "Message for unclaimed partition {}:{}@{}, rewinding to it after the session",
                message.topic, message.partition, message.offset
            );
            unclaimed.note(key, message.offset);
            return;
        };

        // Counted before the send so an undelivered message is read again.
        claim.progress.routed(message.offset);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            sent = claim.sender.send(message) => {
                if sent.is_err() {
                    debug!("Claim {}:{} already closed", key.0, key.1);
                }
            }
        }
    }

    /// Receive errors are transient unless librdkafka marked the client failed.
    fn receive_error(&self, e: KafkaError) -> Result<()> {
        match self.consumer.client().fatal_error() {
            Some((code, reason)) => Err(Error::Consumer(format!(
                "Fatal consumer error {code:?}: {reason}"
            ))),
            None => {
                warn!("Error receiving message, continuing: {e}");
                Ok(())
            }
        }
    }

    /// Seek every partition this member still owns back to its resume point.
    ///
    /// Partitions that were revoked resume from the committed offset on their
    /// next owner. If a seek fails the subscription is dropped, so the next
    /// session rejoins the group and restarts from the committed offsets.
    fn rewind(&self, state: &mut SessionState, resume: ResumePoints) {
        if resume.is_empty() {
            return;
        }
        let assigned = match self.assigned_partitions() {
            Ok(assigned) => assigned,
            Err(e) => {
                warn!("Failed to read assignment before rewinding: {e}");
                self.resubscribe(state);
                return;
            }
        };

        for ((topic, partition), offset) in resume.0 {
            if !assigned.contains(&(topic.clone(), partition)) {
                continue;
            }
            match self.consumer.seek(
                &topic,
                partition,
                Offset::Offset(offset),
                self.metadata_timeout,
            ) {
                Ok(()) => info!("Rewound {topic}:{partition} to offset {offset}"),
                Err(e) => {
                    warn!("Failed to rewind {topic}:{partition} to offset {offset}: {e}");
                    self.resubscribe(state);
                    return;
                }
            }
        }
    }

    fn resubscribe(&self, state: &mut SessionState) {
        self.consumer.unsubscribe();
        state.subscription = None;
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    async fn check(&self, topic: &str) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        let topic_name = topic.to_string();
        let timeout = self.metadata_timeout;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let metadata = consumer.fetch_metadata(Some(&topic_name), timeout)?;
            let found = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic_name)
                .ok_or_else(|| Error::UnknownTopic(topic_name.clone()))?;
            if let Some(err) = found.error() {
                return Err(Error::UnknownTopic(format!("{topic_name}: {err:?}")));
            }
            info!(
                "Topic {topic_name} has {} partitions",
                found.partitions().len()
            );
            Ok(())
        })
        .await
        .map_err(|e| Error::Consumer(format!("Metadata probe task failed: {e}")))?
    }

    async fn consume(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        handler: Arc<dyn GroupHandler>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.subscription.as_deref() != Some(topic) {
            self.consumer.subscribe(&[topic])?;
            state.subscription = Some(topic.to_string());
            info!("Subscribed to topic {topic}");
        }

        // Earlier sessions may have left notifications behind; the current
        // assignment is read from the consumer itself.
        while state.events.try_recv().is_ok() {}

        let mut unclaimed = ResumePoints::default();
        let mut early = Vec::new();
        let claimed = loop {
            let assigned = self.assigned_partitions()?;
            if !assigned.is_empty() {
                break assigned;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                event = state.events.recv() => match event {
                    Some(RebalanceEvent::Error(e)) => return Err(Error::Session(e)),
                    Some(_) => {}
                    None => return Err(Error::Session("rebalance channel closed".to_string())),
                },
                message = self.consumer.recv() => match message {
                    Ok(message) => early.push(raw_message(&message)),
                    Err(e) => self.receive_error(e)?,
                },
            }
        };
        while state.events.try_recv().is_ok() {}

        let generation_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(SessionInfo::new(generation_id, group_by_topic(&claimed)));
        info!("Consumer group session started: {session}");
        handler.setup(&session);

        let session_token = cancel.child_token();
        let mut claims = HashMap::new();
        let mut tasks = JoinSet::new();
        for (claim_topic, partition) in claimed {
            let (tx, rx) = mpsc::channel(self.claim_buffer_size);
            let progress = ClaimProgress::new();

            let mut claim = KafkaClaim {
                topic: claim_topic.clone(),
                partition,
                rx,
                session_token: session_token.clone(),
                consumer: Arc::clone(&self.consumer),
                marked: Arc::clone(&progress.marked),
            };
            claims.insert(
                (claim_topic, partition),
                ClaimRoute {
                    sender: tx,
                    progress,
                },
            );
            let handler = Arc::clone(&handler);
            let session = Arc::clone(&session);
            tasks.spawn(async move { handler.consume_claim(&session, &mut claim).await });
        }

        for message in early {
            self.route(cancel, &mut claims, &mut unclaimed, message).await;
        }

        let result = loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::End(Ok(())),
                event = state.events.recv() => match event {
                    Some(RebalanceEvent::Error(e)) => Step::End(Err(Error::Session(e))),
                    Some(RebalanceEvent::Revoke(partitions)) => {
                        debug!("Revoke of {} partitions ends generation {generation_id}", partitions.len());
                        Step::End(Ok(()))
                    }
                    Some(RebalanceEvent::Assign(partitions)) => {
                        debug!("Assignment of {} partitions ends generation {generation_id}", partitions.len());
                        Step::End(Ok(()))
                    }
                    None => Step::End(Err(Error::Session("rebalance channel closed".to_string()))),
                },
                message = self.consumer.recv() => match message {
                    Ok(message) => Step::Route(raw_message(&message)),
                    Err(e) => match self.receive_error(e) {
                        Ok(()) => Step::Skip,
                        Err(e) => Step::End(Err(e)),
                    },
                },
            };

            match step {
                Step::Route(message) => {
                    self.route(cancel, &mut claims, &mut unclaimed, message)
                        .await
                }
                Step::Skip => {}
                Step::End(result) => break result,
            }
        };

        session_token.cancel();
        let mut resume = unclaimed;
        let progress: Vec<_> = claims
            .into_iter()
            .map(|(partition, claim)| (partition, claim.progress))
            .collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Claim failed in generation {generation_id}: {e}"),
                Err(e) => error!("Claim task failed in generation {generation_id}: {e}"),
            }
        }
        for (partition, progress) in progress {
            if let Some(offset) = progress.resume_point() {
                resume.note(partition, offset);
            }
        }
        self.rewind(&mut state, resume);
        handler.cleanup(&session);

        result
    }
}

struct KafkaClaim {
    topic: String,
    partition: i32,
    rx: mpsc::Receiver<RawMessage>,
    session_token: CancellationToken,
    consumer: Arc<SpanStreamConsumer>,
    marked: Arc<AtomicI64>,
}

#[async_trait]
impl Claim for KafkaClaim {
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
        // The stored offset is the resume point, one past the handled message.
        self.marked.store(message.offset + 1, Ordering::SeqCst);
        if let Err(e) =
            self.consumer
                .store_offset(&message.topic, message.partition, message.offset + 1)
        {
            warn!(
                "Failed to store offset {}:{}@{}: {e}",
                message.topic, message.partition, message.offset
            );
        }
    }
}

/// Copy a Kafka message out of the consumer's buffers.
pub fn raw_message<M: Message>(message: &M) -> RawMessage {
    RawMessage {
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        timestamp: message.timestamp().to_millis(),
    }
}

fn topic_partitions(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements()
        .iter()
        .map(|e| (e.topic().to_string(), e.partition()))
        .collect()
}

fn group_by_topic(partitions: &[TopicPartition]) -> BTreeMap<String, Vec<i32>> {
    let mut claims: BTreeMap<String, Vec<i32>> = BTreeMap::new();
    for (topic, partition) in partitions {
        claims.entry(topic.clone()).or_default().push(*partition);
    }
    for partitions in claims.values_mut() {
        partitions.sort_unstable();
    }
    claims
}
