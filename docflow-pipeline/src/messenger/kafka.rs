//! Kafka-backed messengers for runs split across processes.
//!
//! Topics are derived from the pipeline name:
//!
//! - `<pipeline>_source`: documents to process
//! - `<pipeline>_destination`: documents to index
//! - `<pipeline>_event`: lifecycle events
//! - `<pipeline>_failure`: dead letters
//!
//! Consumers never auto-commit. The worker commits after each document and
//! the indexer after each batch, so a crash leads to redelivery rather than loss.
//! The indexer only commits a partition up to its oldest document that is
//! still waiting in a batch.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::Message as KafkaMessage,
    producer::{FutureProducer, FutureRecord},
    Offset, TopicPartitionList,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::MessengerError;
use crate::messenger::{IndexerMessenger, PublisherMessenger, WorkerMessenger};
use docflow_shared::{Document, Event, EventType};

/// Topic names for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaTopics {
    pub source: String,
    pub destination: String,
    pub event: String,
    pub failure: String,
}

impl KafkaTopics {
    pub fn for_pipeline(pipeline: &str) -> Self {
        Self {
            source: format!("{}_source", pipeline),
            destination: format!("{}_destination", pipeline),
            event: format!("{}_event", pipeline),
            failure: format!("{}_failure", pipeline),
        }
    }
}

fn create_producer(brokers: &str) -> Result<FutureProducer, MessengerError> {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "30000")
        .create()
        .map_err(MessengerError::from)
}

fn create_consumer(
    brokers: &str,
    group_id: &str,
    topic: &str,
) -> Result<StreamConsumer, MessengerError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "6000")
        .create()?;

    consumer.subscribe(&[topic])?;
    info!(brokers = %brokers, group_id = %group_id, topic = %topic, "Subscribed Kafka consumer");
    Ok(consumer)
}

async fn produce(
    producer: &FutureProducer,
    topic: &str,
    key: &str,
    payload: &str,
) -> Result<(), MessengerError> {
    producer
        .send(
            FutureRecord::to(topic).key(key).payload(payload),
            Duration::from_secs(0),
        )
        .await
        .map(|_| ())
        .map_err(|(e, _)| MessengerError::kafka(e.to_string()))
}

async fn produce_event(
    producer: &FutureProducer,
    topic: &str,
    doc: &Document,
    message: Option<String>,
    event_type: EventType,
) -> Result<(), MessengerError> {
    let event = Event::new(doc, message, event_type);
    debug!(event = %event, "Sending event");
    produce(producer, topic, event.document_id(), &event.to_json()?).await
}

/// Highest consumed offset per partition, waiting to be committed.
#[derive(Default)]
struct PendingOffsets {
    offsets: Mutex<HashMap<(String, i32), i64>>,
}

impl PendingOffsets {
    fn record(&self, topic: &str, partition: i32, offset: i64) -> Result<(), MessengerError> {
        let mut offsets = self
            .offsets
            .lock()
            .map_err(|e| MessengerError::kafka(e.to_string()))?;
        let next = offset + 1;
        offsets
            .entry((topic.to_string(), partition))
            .and_modify(|current| *current = (*current).max(next))
            .or_insert(next);
        Ok(())
    }

    fn commit(&self, consumer: &StreamConsumer) -> Result<(), MessengerError> {
        let drained: Vec<((String, i32), i64)> = {
            let mut offsets = self
                .offsets
                .lock()
                .map_err(|e| MessengerError::kafka(e.to_string()))?;
            offsets.drain().collect()
        };

        if drained.is_empty() {
            return Ok(());
        }
        commit_offsets(consumer, &drained)
    }
}

/// Position of one consumed message, plus its document if it decoded.
struct Received {
    topic: String,
    partition: i32,
    offset: i64,
    doc: Option<Document>,
}

/// Receive one message from `consumer` within `poll_timeout`.
///
/// Undecodable messages are logged and returned without a document so their
/// offset is still acknowledged.
async fn receive(
    consumer: &StreamConsumer,
    poll_timeout: Duration,
) -> Result<Option<Received>, MessengerError> {
    let message = match timeout(poll_timeout, consumer.recv()).await {
        Err(_) => return Ok(None),
        Ok(message) => message?,
    };

    let doc = match message.payload().map(std::str::from_utf8) {
        None => {
            warn!(topic = %message.topic(), offset = message.offset(), "Skipping message with empty payload");
            None
        }
        Some(Err(e)) => {
            warn!(topic = %message.topic(), offset = message.offset(), error = %e, "Skipping message with invalid UTF-8 payload");
            None
        }
        Some(Ok(json)) => match Document::from_json(json) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(topic = %message.topic(), offset = message.offset(), error = %e, "Skipping undecodable document");
                None
            }
        },
    };

    Ok(Some(Received {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        doc,
    }))
}

fn document_key(doc: &Document) -> String {
    format!("{}/{}", doc.run_id().unwrap_or_default(), doc.id())
}

/// Offset bookkeeping for one partition.
#[derive(Debug, Default)]
struct PartitionOffsets {
    /// Offsets of documents handed out but not yet acknowledged.
    outstanding: BTreeSet<i64>,
    /// One past the highest offset seen.
    next: i64,
    /// Last offset committed.
    committed: i64,
}

impl PartitionOffsets {
    fn seen(&mut self, offset: i64) {
        self.next = self.next.max(offset + 1);
    }

    /// The offset that can be committed without skipping an outstanding document.
    fn watermark(&self) -> i64 {
        self.outstanding.first().copied().unwrap_or(self.next)
    }
}

/// Tracks which consumed offsets the indexer has acknowledged.
///
/// Documents are matched to offsets by run id and id. A document delivered
/// twice is queued twice and acknowledged oldest first.
#[derive(Debug, Default)]
struct OffsetTracker {
    documents: HashMap<String, VecDeque<(String, i32, i64)>>,
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    fn received(&mut self, doc: &Document, topic: &str, partition: i32, offset: i64) {
        let state = self.partitions.entry((topic.to_string(), partition)).or_default();
        state.seen(offset);
        state.outstanding.insert(offset);
        self.documents
            .entry(document_key(doc))
            .or_default()
            .push_back((topic.to_string(), partition, offset));
    }

    /// A message that produced no document counts as acknowledged at once.
    fn skipped(&mut self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .seen(offset);
    }

    fn complete(&mut self, batch: &[Document]) {
        for doc in batch {
            let key = document_key(doc);
            let Some(queue) = self.documents.get_mut(&key) else {
                debug!(doc_id = %doc.id(), "No consumed offset for document");
                continue;
            };
            if let Some((topic, partition, offset)) = queue.pop_front() {
                if let Some(state) = self.partitions.get_mut(&(topic, partition)) {
                    state.outstanding.remove(&offset);
                }
            }
            if queue.is_empty() {
                self.documents.remove(&key);
            }
        }
    }

    /// Partitions whose watermark moved past the last commit.
    fn committable(&self) -> Vec<((String, i32), i64)> {
        self.partitions
            .iter()
            .filter(|(_, state)| state.watermark() > state.committed)
            .map(|(key, state)| (key.clone(), state.watermark()))
            .collect()
    }

    fn committed(&mut self, offsets: &[((String, i32), i64)]) {
        for (key, offset) in offsets {
            if let Some(state) = self.partitions.get_mut(key) {
                state.committed = state.committed.max(*offset);
            }
        }
    }
}

fn commit_offsets(
    consumer: &StreamConsumer,
    offsets: &[((String, i32), i64)],
) -> Result<(), MessengerError> {
    let mut tpl = TopicPartitionList::new();
    for ((topic, partition), offset) in offsets {
        tpl.add_partition_offset(topic, *partition, Offset::Offset(*offset))?;
    }
    consumer.commit(&tpl, CommitMode::Sync)?;
    Ok(())
}

/// Publisher side: produces to the source topic, consumes this run's events.
pub struct KafkaPublisherMessenger {
    producer: FutureProducer,
    event_consumer: StreamConsumer,
    topics: KafkaTopics,
    run_id: String,
    poll_timeout: Duration,
}

impl KafkaPublisherMessenger {
    pub fn new(
        brokers: &str,
        pipeline: &str,
        run_id: &str,
        poll_timeout: Duration,
    ) -> Result<Self, MessengerError> {
        let topics = KafkaTopics::for_pipeline(pipeline);
        let group_id = format!("publisher_{}", run_id);

        Ok(Self {
            producer: create_producer(brokers)?,
            event_consumer: create_consumer(brokers, &group_id, &topics.event)?,
            topics,
            run_id: run_id.to_string(),
            poll_timeout,
        })
    }
}

#[async_trait]
impl PublisherMessenger for KafkaPublisherMessenger {
    async fn send_for_processing(&self, doc: Document) -> Result<(), MessengerError> {
        produce(&self.producer, &self.topics.source, doc.id(), &doc.to_json()?).await
    }

    /// Events from other runs sharing the topic are skipped and reported as nothing received.
    async fn poll_event(&self) -> Result<Option<Event>, MessengerError> {
        let message = match timeout(self.poll_timeout, self.event_consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(message) => message?,
        };

        let Some(payload) = message.payload() else {
            return Ok(None);
        };
        let json = std::str::from_utf8(payload)
            .map_err(|e| MessengerError::kafka(format!("Invalid UTF-8 payload: {}", e)))?;
        let event = Event::from_json(json)?;

        if event.run_id() != Some(self.run_id.as_str()) {
            debug!(event = %event, "Ignoring event from another run");
            return Ok(None);
        }
        Ok(Some(event))
    }

    async fn close(&self) -> Result<(), MessengerError> {
        self.event_consumer.unsubscribe();
        Ok(())
    }
}

/// Worker side: consumes the source topic, produces to the destination,
/// event and failure topics.
///
/// Each worker needs its own instance: commits cover everything the
/// instance consumed, and `close` unsubscribes its consumer.
pub struct KafkaWorkerMessenger {
    producer: FutureProducer,
    consumer: StreamConsumer,
    pending: PendingOffsets,
    topics: KafkaTopics,
    poll_timeout: Duration,
}

impl KafkaWorkerMessenger {
    pub fn new(brokers: &str, pipeline: &str, poll_timeout: Duration) -> Result<Self, MessengerError> {
        let topics = KafkaTopics::for_pipeline(pipeline);
        let group_id = format!("{}_worker", pipeline);

        Ok(Self {
            producer: create_producer(brokers)?,
            consumer: create_consumer(brokers, &group_id, &topics.source)?,
            pending: PendingOffsets::default(),
            topics,
            poll_timeout,
        })
    }
}

#[async_trait]
impl WorkerMessenger for KafkaWorkerMessenger {
    async fn poll_doc_to_process(&self) -> Result<Option<Document>, MessengerError> {
        let Some(received) = receive(&self.consumer, self.poll_timeout).await? else {
            return Ok(None);
        };
        self.pending
            .record(&received.topic, received.partition, received.offset)?;
        Ok(received.doc)
    }

    async fn send_for_indexing(&self, doc: Document) -> Result<(), MessengerError> {
        produce(&self.producer, &self.topics.destination, doc.id(), &doc.to_json()?).await
    }

    async fn send_event(
        &self,
        doc: &Document,
        message: Option<String>,
        event_type: EventType,
    ) -> Result<(), MessengerError> {
        produce_event(&self.producer, &self.topics.event, doc, message, event_type).await
    }

    async fn send_failed(&self, doc: Document) -> Result<(), MessengerError> {
        produce(&self.producer, &self.topics.failure, doc.id(), &doc.to_json()?).await
    }

    async fn commit_pending_doc_offsets(&self) -> Result<(), MessengerError> {
        self.pending.commit(&self.consumer)
    }

    async fn close(&self) -> Result<(), MessengerError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Indexer side: consumes the destination topic, produces to the event topic.
pub struct KafkaIndexerMessenger {
    producer: FutureProducer,
    consumer: StreamConsumer,
    tracker: Mutex<OffsetTracker>,
    topics: KafkaTopics,
    poll_timeout: Duration,
}

impl KafkaIndexerMessenger {
    pub fn new(brokers: &str, pipeline: &str, poll_timeout: Duration) -> Result<Self, MessengerError> {
        let topics = KafkaTopics::for_pipeline(pipeline);
        let group_id = format!("{}_indexer", pipeline);

        Ok(Self {
            producer: create_producer(brokers)?,
            consumer: create_consumer(brokers, &group_id, &topics.destination)?,
            tracker: Mutex::new(OffsetTracker::default()),
            topics,
            poll_timeout,
        })
    }

    fn tracker(&self) -> Result<std::sync::MutexGuard<'_, OffsetTracker>, MessengerError> {
        self.tracker
            .lock()
            .map_err(|e| MessengerError::kafka(e.to_string()))
    }
}

#[async_trait]
impl IndexerMessenger for KafkaIndexerMessenger {
    async fn poll_doc_to_index(&self) -> Result<Option<Document>, MessengerError> {
        let Some(received) = receive(&self.consumer, self.poll_timeout).await? else {
            return Ok(None);
        };

        let mut tracker = self.tracker()?;
        match &received.doc {
            Some(doc) => tracker.received(doc, &received.topic, received.partition, received.offset),
            None => tracker.skipped(&received.topic, received.partition, received.offset),
        }
        Ok(received.doc)
    }

    async fn send_event(
        &self,
        doc: &Document,
        message: Option<String>,
        event_type: EventType,
    ) -> Result<(), MessengerError> {
        produce_event(&self.producer, &self.topics.event, doc, message, event_type).await
    }

    /// Commits each partition up to its oldest document not yet acknowledged.
    async fn batch_complete(&self, batch: &[Document]) -> Result<(), MessengerError> {
        let offsets = {
            let mut tracker = self.tracker()?;
            tracker.complete(batch);
            tracker.committable()
        };
        if offsets.is_empty() {
            return Ok(());
        }

        commit_offsets(&self.consumer, &offsets)?;
        self.tracker()?.committed(&offsets);
        Ok(())
    }

    async fn close(&self) -> Result<(), MessengerError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        let topics = KafkaTopics::for_pipeline("pipeline1");

        assert_eq!(topics.source, "pipeline1_source");
        assert_eq!(topics.destination, "pipeline1_destination");
        assert_eq!(topics.event, "pipeline1_event");
        assert_eq!(topics.failure, "pipeline1_failure");
    }

    #[test]
    fn test_pending_offsets_keep_highest() {
        let pending = PendingOffsets::default();

        pending.record("t", 0, 5).unwrap();
        pending.record("t", 0, 3).unwrap();
        pending.record("t", 1, 7).unwrap();

        let offsets = pending.offsets.lock().unwrap();
        assert_eq!(offsets.get(&("t".to_string(), 0)), Some(&6));
        assert_eq!(offsets.get(&("t".to_string(), 1)), Some(&8));
    }

    fn doc(id: &str) -> Document {
        Document::with_run_id(id, "run1")
    }

    fn partition_key(partition: i32) -> (String, i32) {
        ("t".to_string(), partition)
    }

    #[test]
    fn test_batch_does_not_commit_documents_still_batched() {
        let mut tracker = OffsetTracker::default();
        tracker.received(&doc("d0"), "t", 0, 0);
        tracker.received(&doc("d1"), "t", 0, 1);

        tracker.complete(&[doc("d0")]);
        assert_eq!(tracker.committable(), vec![(partition_key(0), 1)]);
        tracker.committed(&[(partition_key(0), 1)]);

        tracker.complete(&[doc("d1")]);
        assert_eq!(tracker.committable(), vec![(partition_key(0), 2)]);
    }

    #[test]
    fn test_out_of_order_batch_waits_for_oldest_document() {
        let mut tracker = OffsetTracker::default();
        tracker.received(&doc("d0"), "t", 0, 10);
        tracker.received(&doc("d1"), "t", 0, 11);
        tracker.received(&doc("d2"), "t", 0, 12);

        tracker.complete(&[doc("d1"), doc("d2")]);
        assert_eq!(tracker.committable(), vec![(partition_key(0), 10)]);
        tracker.committed(&[(partition_key(0), 10)]);
        assert!(tracker.committable().is_empty());

        tracker.complete(&[doc("d0")]);
        assert_eq!(tracker.committable(), vec![(partition_key(0), 13)]);
    }

    #[test]
    fn test_skipped_messages_and_redelivered_documents() {
        let mut tracker = OffsetTracker::default();
        tracker.received(&doc("d0"), "t", 1, 0);
        tracker.skipped("t", 1, 1);
        tracker.received(&doc("d0"), "t", 1, 2);

        tracker.complete(&[doc("d0")]);
        assert_eq!(tracker.committable(), vec![(partition_key(1), 2)]);

        tracker.complete(&[doc("d0")]);
        assert_eq!(tracker.committable(), vec![(partition_key(1), 3)]);
        assert!(tracker.documents.is_empty());
    }
}
