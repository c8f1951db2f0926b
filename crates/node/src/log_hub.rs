//! Per-deployment log ring plus subscriber fan-out on the node side,
//! structurally identical to `symphony-conductor`'s `LogHub` (both are
//! grounded on the same bounded [`LogRing`] model) but populated by the
//! supervisor's own readers instead of ingested `LogBatch` frames.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use symphony_core::model::{LogEntry, LogRing, DEFAULT_RING_CAPACITY};

/// Per-deployment broadcast channel capacity for the conductor session's
/// log-forwarding task (spec.md §5 "no unbounded in-memory buffering").
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

struct Topic {
    ring: LogRing,
    sender: broadcast::Sender<LogEntry>,
}

impl Topic {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        Self { ring: LogRing::new(DEFAULT_RING_CAPACITY), sender }
    }
}

/// One ring + broadcast channel per deployment, created lazily.
#[derive(Default)]
pub struct NodeLogHub {
    topics: RwLock<HashMap<String, Topic>>,
}

impl NodeLogHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a captured line for `deployment_id`.
    pub async fn push(&self, deployment_id: &str, entry: LogEntry) {
        let mut topics = self.topics.write().await;
        let topic = topics.entry(deployment_id.to_string()).or_insert_with(Topic::new);
        topic.ring.push(entry.clone());
        let _ = topic.sender.send(entry);
    }

    /// Subscribe to `deployment_id`, for the conductor session's
    /// `LogSubscribe` handler: returns up to `tail` buffered entries plus a
    /// receiver for everything pushed afterward. A subscriber that falls
    /// behind the broadcast channel's capacity observes
    /// `RecvError::Lagged` and is treated as `slow-consumer` by the caller
    /// (spec.md §4.7).
    pub async fn subscribe(&self, deployment_id: &str, tail: usize) -> (Vec<LogEntry>, broadcast::Receiver<LogEntry>) {
        let mut topics = self.topics.write().await;
        let topic = topics.entry(deployment_id.to_string()).or_insert_with(Topic::new);
        (topic.ring.tail(tail), topic.sender.subscribe())
    }

    /// Drop a deployment's topic entirely, once it's torn down for good
    /// (deletion, not just a stop) so the hub doesn't accumulate ghost
    /// entries for deployments that will never run again.
    pub async fn remove(&self, deployment_id: &str) {
        self.topics.write().await.remove(deployment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_core::model::LogStream;

    fn entry(line: &str) -> LogEntry {
        LogEntry { timestamp_unix_ms: 0, stream: LogStream::Stdout, line: line.to_string() }
    }

    #[tokio::test]
    async fn subscriber_gets_tail_then_live_entries() {
        let hub = NodeLogHub::new();
        hub.push("d1", entry("a")).await;
        hub.push("d1", entry("b")).await;

        let (tail, mut rx) = hub.subscribe("d1", 10).await;
        assert_eq!(tail.iter().map(|e| e.line.clone()).collect::<Vec<_>>(), vec!["a", "b"]);

        hub.push("d1", entry("c")).await;
        assert_eq!(rx.recv().await.unwrap().line, "c");
    }

    #[tokio::test]
    async fn ring_bounds_hold_under_heavy_write_and_tail_subscriber_sees_recent_window() {
        let hub = NodeLogHub::new();
        for i in 0..10_000 {
            hub.push("d1", entry(&i.to_string())).await;
        }
        let (tail, _rx) = hub.subscribe("d1", 200).await;
        assert_eq!(tail.len(), 200);
        assert_eq!(tail.first().unwrap().line, "9800");
        assert_eq!(tail.last().unwrap().line, "9999");
    }

    #[tokio::test]
    async fn remove_drops_the_topic() {
        let hub = NodeLogHub::new();
        hub.push("d1", entry("a")).await;
        hub.remove("d1").await;
        let (tail, _rx) = hub.subscribe("d1", 10).await;
        assert!(tail.is_empty());
    }
}
