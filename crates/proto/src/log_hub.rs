//! Per-deployment log ring plus subscriber fan-out, grounded on the node
//! model's bounded `LogRing` (`spec.md` §4.4). Ingests `LogBatch` frames from
//! sessions and serves a tail-then-follow view to subscribers — both the
//! conductor's own session plumbing and `symphony-http`'s streaming log
//! endpoint, which is why this lives next to the wire types rather than
//! inside the conductor binary crate.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use symphony_core::model::{LogEntry, LogRing, DEFAULT_RING_CAPACITY};
use symphony_core::SharedRegistry;

use crate::generated::{conductor_to_node, ConductorToNode, LogSubscribe};
use crate::session::SessionHandle;

/// Per-deployment broadcast channel capacity for live log subscribers
/// (`spec.md` §5).
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

/// Fan-out hub: one bounded ring and broadcast channel per deployment,
/// created lazily on first ingest or subscribe.
#[derive(Default)]
pub struct LogHub {
    topics: RwLock<HashMap<String, Topic>>,
}

impl LogHub {
    /// An empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch of entries a node reported for `deployment_id`.
    pub async fn ingest(&self, deployment_id: &str, entries: Vec<LogEntry>) {
        let mut topics = self.topics.write().await;
        let topic = topics.entry(deployment_id.to_string()).or_insert_with(Topic::new);
        for entry in entries {
            topic.ring.push(entry.clone());
            // No subscribers is a normal, common case; a send error here
            // just means nobody's listening right now.
            let _ = topic.sender.send(entry);
        }
    }

    /// Subscribe to `deployment_id`'s stream: returns up to the last `tail`
    /// buffered entries plus a receiver for everything ingested afterward.
    pub async fn subscribe(
        &self,
        deployment_id: &str,
        tail: usize,
    ) -> (Vec<LogEntry>, broadcast::Receiver<LogEntry>) {
        let mut topics = self.topics.write().await;
        let topic = topics.entry(deployment_id.to_string()).or_insert_with(Topic::new);
        (topic.ring.tail(tail), topic.sender.subscribe())
    }

    /// Ask the node currently holding `deployment_id`'s assignment to start
    /// forwarding its log ring, then return this hub's own tail-then-follow
    /// view. Used by the HTTP boundary's streaming log endpoint (`spec.md`
    /// §6 "A streaming log endpoint per deployment"): the conductor itself
    /// holds no log lines until a node is asked to start pushing `LogBatch`
    /// frames for this deployment.
    pub async fn subscribe_via_node(
        &self,
        registry: &SharedRegistry<SessionHandle>,
        node_id: &str,
        deployment_id: &str,
        tail: usize,
    ) -> (Vec<LogEntry>, broadcast::Receiver<LogEntry>) {
        if let Some(handle) = registry.handle(node_id).await {
            let frame = ConductorToNode {
                frame: Some(conductor_to_node::Frame::LogSubscribe(LogSubscribe {
                    deployment_id: deployment_id.to_string(),
                    tail: tail as u32,
                })),
            };
            let _ = handle.to_node.try_send(Ok(frame));
        }
        self.subscribe(deployment_id, tail).await
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
        let hub = LogHub::new();
        hub.ingest("d1", vec![entry("a"), entry("b")]).await;

        let (tail, mut rx) = hub.subscribe("d1", 10).await;
        assert_eq!(tail.iter().map(|e| e.line.clone()).collect::<Vec<_>>(), vec!["a", "b"]);

        hub.ingest("d1", vec![entry("c")]).await;
        let live = rx.recv().await.unwrap();
        assert_eq!(live.line, "c");
    }

    #[tokio::test]
    async fn topics_are_independent_per_deployment() {
        let hub = LogHub::new();
        hub.ingest("d1", vec![entry("a")]).await;
        hub.ingest("d2", vec![entry("x"), entry("y")]).await;

        let (tail1, _rx1) = hub.subscribe("d1", 10).await;
        let (tail2, _rx2) = hub.subscribe("d2", 10).await;
        assert_eq!(tail1.len(), 1);
        assert_eq!(tail2.len(), 2);
    }
}
