//! Batching of documents ahead of bulk delivery.
//!
//! A batch releases its contents when it reaches capacity or when more than
//! the configured timeout has passed since the last add or flush. Released
//! documents are returned to the caller; the batch never delivers anything
//! itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use docflow_shared::Document;

/// Buffer that hands back documents once a size or time threshold is crossed.
pub trait Batch: Send {
    /// Add a document. If the batch was expired or full, its previous contents
    /// are drained and returned, and `doc` becomes the first entry of the new batch.
    fn add(&mut self, doc: Document) -> Vec<Document>;

    /// Drain and return the contents only if the batch has expired.
    fn flush_if_expired(&mut self) -> Vec<Document>;

    /// Drain and return the contents unconditionally.
    fn flush(&mut self) -> Vec<Document>;
}

/// A single bounded queue with one capacity and one timeout.
#[derive(Debug)]
pub struct SingleBatch {
    queue: Vec<Document>,
    capacity: usize,
    timeout: Duration,
    last_add_or_flush: Instant,
}

impl SingleBatch {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Vec::with_capacity(capacity),
            capacity,
            timeout,
            last_add_or_flush: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn is_expired(&self) -> bool {
        self.last_add_or_flush.elapsed() > self.timeout
    }

    fn drain(&mut self) -> Vec<Document> {
        std::mem::replace(&mut self.queue, Vec::with_capacity(self.capacity))
    }
}

impl Batch for SingleBatch {
    fn add(&mut self, doc: Document) -> Vec<Document> {
        let released = if self.is_expired() || self.queue.len() >= self.capacity {
            self.drain()
        } else {
            Vec::new()
        };

        self.queue.push(doc);
        self.last_add_or_flush = Instant::now();
        released
    }

    fn flush_if_expired(&mut self) -> Vec<Document> {
        if self.is_expired() {
            self.flush()
        } else {
            Vec::new()
        }
    }

    fn flush(&mut self) -> Vec<Document> {
        self.last_add_or_flush = Instant::now();
        self.drain()
    }
}

/// Batch partitioned by the value of a key field, e.g. the target index.
///
/// Every shard applies the same capacity and timeout independently.
/// Documents without the key field share the default shard. Shards are
/// dropped once flushed empty, so short-lived keys do not accumulate.
#[derive(Debug)]
pub struct ShardedBatch {
    key_field: String,
    capacity: usize,
    timeout: Duration,
    shards: HashMap<Option<String>, SingleBatch>,
}

impl ShardedBatch {
    pub fn new(key_field: impl Into<String>, capacity: usize, timeout: Duration) -> Self {
        Self {
            key_field: key_field.into(),
            capacity,
            timeout,
            shards: HashMap::new(),
        }
    }

    fn shard_key(&self, doc: &Document) -> Option<String> {
        doc.get_string(&self.key_field)
    }
}

impl Batch for ShardedBatch {
    fn add(&mut self, doc: Document) -> Vec<Document> {
        let key = self.shard_key(&doc);
        let (capacity, timeout) = (self.capacity, self.timeout);
        self.shards
            .entry(key)
            .or_insert_with(|| SingleBatch::new(capacity, timeout))
            .add(doc)
    }

    fn flush_if_expired(&mut self) -> Vec<Document> {
        let released = self
            .shards
            .values_mut()
            .flat_map(|shard| shard.flush_if_expired())
            .collect();
        self.shards.retain(|_, shard| !shard.is_empty());
        released
    }

    fn flush(&mut self) -> Vec<Document> {
        self.shards
            .drain()
            .flat_map(|(_, mut shard)| shard.flush())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.id()).collect()
    }

    #[test]
    fn test_simple_add_and_flush() {
        let mut batch = SingleBatch::new(100, Duration::from_millis(1000));

        assert!(batch.add(Document::new("doc1")).is_empty());
        assert!(batch.add(Document::new("doc2")).is_empty());
        assert!(batch.add(Document::new("doc3")).is_empty());

        let docs = batch.flush();
        assert_eq!(ids(&docs), vec!["doc1", "doc2", "doc3"]);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_full_batch_releases_previous_contents() {
        let mut batch = SingleBatch::new(1, Duration::from_millis(1000));

        assert!(batch.add(Document::new("d1")).is_empty());
        assert_eq!(ids(&batch.add(Document::new("d2"))), vec!["d1"]);
        assert_eq!(ids(&batch.flush()), vec!["d2"]);
    }

    #[test]
    fn test_timeout_expires_batch() {
        let mut batch = SingleBatch::new(100, Duration::from_millis(10));

        assert!(batch.add(Document::new("d1")).is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ids(&batch.flush_if_expired()), vec!["d1"]);
        assert!(batch.flush().is_empty());

        assert!(batch.add(Document::new("d2")).is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ids(&batch.add(Document::new("d3"))), vec!["d2"]);
        assert_eq!(ids(&batch.flush()), vec!["d3"]);
    }

    #[test]
    fn test_not_expired_before_timeout() {
        let mut batch = SingleBatch::new(100, Duration::from_secs(100));

        for id in ["d1", "d2", "d3"] {
            assert!(batch.add(Document::new(id)).is_empty());
            assert!(batch.flush_if_expired().is_empty());
        }

        assert_eq!(batch.flush().len(), 3);
    }

    fn routed(id: &str, index: &str) -> Document {
        let mut doc = Document::new(id);
        doc.set_field("index", index).unwrap();
        doc
    }

    #[test]
    fn test_sharded_only_full_shard_releases() {
        let mut batch = ShardedBatch::new("index", 1, Duration::from_secs(1));

        assert!(batch.add(routed("doc1", "index1")).is_empty());
        assert!(batch.add(routed("doc2", "index2")).is_empty());
        assert!(batch.add(routed("doc3", "index3")).is_empty());
        assert_eq!(ids(&batch.add(routed("doc4", "index2"))), vec!["doc2"]);

        let mut flushed: Vec<String> = batch.flush().iter().map(|d| d.id().to_string()).collect();
        flushed.sort();
        assert_eq!(flushed, vec!["doc1", "doc3", "doc4"]);
    }

    #[test]
    fn test_sharded_unrouted_documents_share_default_shard() {
        let mut batch = ShardedBatch::new("index", 100, Duration::from_secs(1));

        batch.add(Document::new("doc1"));
        batch.add(Document::new("doc2"));

        assert_eq!(ids(&batch.flush()), vec!["doc1", "doc2"]);
    }

    #[test]
    fn test_sharded_timeout() {
        let mut batch = ShardedBatch::new("index", 100, Duration::from_millis(10));

        batch.add(routed("doc1", "a"));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(ids(&batch.flush_if_expired()), vec!["doc1"]);
        assert!(batch.flush().is_empty());
    }

    #[test]
    fn test_sharded_flushed_shards_are_dropped() {
        let mut batch = ShardedBatch::new("index", 100, Duration::from_millis(50));

        batch.add(routed("doc1", "a"));
        batch.add(routed("doc2", "b"));
        std::thread::sleep(Duration::from_millis(80));
        batch.add(routed("doc3", "c"));

        let mut expired: Vec<String> =
            batch.flush_if_expired().iter().map(|d| d.id().to_string()).collect();
        expired.sort();
        assert_eq!(expired, vec!["doc1", "doc2"]);
        assert_eq!(batch.shards.len(), 1);

        assert_eq!(ids(&batch.flush()), vec!["doc3"]);
        assert!(batch.shards.is_empty());
    }
}
