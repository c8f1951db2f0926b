//! Process-wide node registry: tracks connected nodes and indexes by group.
//!
//! The registry is transport-agnostic — it holds [`NodeRecord`] plus an
//! opaque per-node command handle `H` (in `symphony-conductor`, this is the
//! sender half of the session's outbound command queue). Readers take a
//! short lock only long enough to clone references and numeric fields, so
//! readers never block writers for the duration of a scheduler pass.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::NodeRecord;

/// Outcome of [`NodeRegistry::register`].
#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The node was registered (or re-registered after a clean deregister).
    Ok,
    /// A session for this `node_id` is already registered and has not been
    /// reaped; the handshake should be rejected per §4.1.
    Conflict,
}

struct Entry<H> {
    record: NodeRecord,
    handle: H,
}

/// Concurrent map from `node_id` to its record and command handle, plus a
/// secondary index by group label.
pub struct NodeRegistry<H> {
    nodes: RwLock<HashMap<String, Entry<H>>>,
}

impl<H: Clone + Send + Sync> NodeRegistry<H> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a newly handshaken node. Returns [`RegisterOutcome::Conflict`]
    /// if a session for this `node_id` is already present — the caller must
    /// reject the `NodeHello` and close the new stream rather than replace
    /// the existing session out from under it.
    pub async fn register(&self, record: NodeRecord, handle: H) -> RegisterOutcome {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&record.node_id) {
            return RegisterOutcome::Conflict;
        }
        nodes.insert(record.node_id.clone(), Entry { record, handle });
        RegisterOutcome::Ok
    }

    /// Remove a node's registration. Idempotent: deregistering an unknown
    /// `node_id` is a no-op, not an error, matching §4.2.
    pub async fn deregister(&self, node_id: &str) {
        self.nodes.write().await.remove(node_id);
    }

    /// Replace the stored record for `node_id` (e.g. after a heartbeat
    /// updates resource usage or `last_heartbeat_ms`). No-op if the node is
    /// no longer registered.
    pub async fn update_record(&self, node_id: &str, record: NodeRecord) {
        if let Some(entry) = self.nodes.write().await.get_mut(node_id) {
            entry.record = record;
        }
    }

    /// The command handle for a node, if currently registered.
    pub async fn handle(&self, node_id: &str) -> Option<H> {
        self.nodes
            .read()
            .await
            .get(node_id)
            .map(|e| e.handle.clone())
    }

    /// A point-in-time copy of every registered node's record.
    pub async fn snapshot(&self) -> Vec<NodeRecord> {
        self.nodes
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    /// A single node's record, if registered.
    pub async fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes.read().await.get(node_id).map(|e| e.record.clone())
    }

    /// Records for nodes advertising `label` in their groups, filtered to
    /// those with a fresh (non-stale, non-disconnected) heartbeat as of
    /// `now_ms` per §4.2 ("returns candidates with fresh heartbeats only").
    pub async fn nodes_in_group(&self, label: &str, now_ms: i64) -> Vec<NodeRecord> {
        self.nodes
            .read()
            .await
            .values()
            .map(|e| &e.record)
            .filter(|r| r.groups.contains(label))
            .filter(|r| {
                matches!(
                    r.connectivity(now_ms),
                    crate::model::Connectivity::Connected
                )
            })
            .cloned()
            .collect()
    }

    /// Number of currently registered nodes.
    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }
}

impl<H: Clone + Send + Sync> Default for NodeRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to a [`NodeRegistry`], cloneable across tasks.
pub type SharedRegistry<H> = Arc<NodeRegistry<H>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CapacityVector, ResourceSnapshot};
    use std::collections::BTreeSet;

    fn record(node_id: &str, group: &str) -> NodeRecord {
        NodeRecord {
            node_id: node_id.into(),
            groups: BTreeSet::from([group.to_string()]),
            capacities_total: CapacityVector::from_pairs([("cpu", 10)]),
            heartbeat_interval_ms: 3_000,
            last_heartbeat_ms: 0,
            resources: ResourceSnapshot::default(),
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicate_node_id() {
        let registry: NodeRegistry<()> = NodeRegistry::new();
        assert_eq!(
            registry.register(record("n1", "gpu"), ()).await,
            RegisterOutcome::Ok
        );
        assert_eq!(
            registry.register(record("n1", "gpu"), ()).await,
            RegisterOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn deregister_then_register_succeeds() {
        let registry: NodeRegistry<()> = NodeRegistry::new();
        registry.register(record("n1", "gpu"), ()).await;
        registry.deregister("n1").await;
        assert_eq!(
            registry.register(record("n1", "gpu"), ()).await,
            RegisterOutcome::Ok
        );
    }

    #[tokio::test]
    async fn deregister_unknown_node_is_noop() {
        let registry: NodeRegistry<()> = NodeRegistry::new();
        registry.deregister("ghost").await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn nodes_in_group_filters_by_group_and_freshness() {
        let registry: NodeRegistry<()> = NodeRegistry::new();
        registry.register(record("n1", "gpu"), ()).await;
        registry.register(record("n2", "cpu"), ()).await;
        let mut stale = record("n3", "gpu");
        stale.last_heartbeat_ms = -100_000;
        registry.register(stale, ()).await;

        let gpu_nodes = registry.nodes_in_group("gpu", 0).await;
        let ids: Vec<_> = gpu_nodes.iter().map(|n| n.node_id.clone()).collect();
        assert_eq!(ids, vec!["n1".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_is_point_in_time_copy() {
        let registry: NodeRegistry<()> = NodeRegistry::new();
        registry.register(record("n1", "gpu"), ()).await;
        let snap = registry.snapshot().await;
        registry.deregister("n1").await;
        assert_eq!(snap.len(), 1, "snapshot must not reflect later mutation");
        assert_eq!(registry.len().await, 0);
    }
}
