//! Tracks the live (deployment -> node) relation and each assignment's
//! acked revision, independent of the deployment store.
//!
//! Per the design notes (`spec.md` §9, "cyclic references"), deployments and
//! nodes are both referenced by id only; the reconciler is the one place
//! that joins an `Assignment` against its `Deployment` and `NodeRecord` at
//! read time. Keeping this table separate from [`symphony_core::store`]
//! means a node loss never requires a coordinated update to two owning
//! structures — clearing an assignment here and unassigning the deployment
//! record are two independent, idempotent operations.

use std::collections::HashMap;

use symphony_core::model::Assignment;
use tokio::sync::RwLock;

/// Concurrent map from `deployment_id` to its live [`Assignment`].
#[derive(Default)]
pub struct AssignmentTable {
    inner: RwLock<HashMap<String, Assignment>>,
}

impl AssignmentTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly placed assignment, replacing any prior entry for
    /// the same deployment.
    pub async fn insert(&self, assignment: Assignment) {
        self.inner
            .write()
            .await
            .insert(assignment.deployment_id.clone(), assignment);
    }

    /// The current assignment for a deployment, if any.
    pub async fn get(&self, deployment_id: &str) -> Option<Assignment> {
        self.inner.read().await.get(deployment_id).cloned()
    }

    /// Drop the assignment for a deployment (node loss, deletion, or an
    /// explicit stop that fully tears the deployment down).
    pub async fn remove(&self, deployment_id: &str) -> Option<Assignment> {
        self.inner.write().await.remove(deployment_id)
    }

    /// Record a node's acknowledgment of a `spec_revision`. Enforces P3
    /// (revision monotonicity) via [`Assignment::ack_revision`]; a no-op if
    /// the deployment has no live assignment (e.g. a late ack arriving
    /// after reassignment).
    pub async fn ack_revision(&self, deployment_id: &str, revision: u64) {
        if let Some(assignment) = self.inner.write().await.get_mut(deployment_id) {
            assignment.ack_revision(revision);
        }
    }

    /// Every assignment currently pinned to `node_id`. Used to release
    /// capacity and clear assignments on node loss (I3).
    pub async fn assigned_to(&self, node_id: &str) -> Vec<Assignment> {
        self.inner
            .read()
            .await
            .values()
            .filter(|a| a.node_id == node_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_on_missing_assignment_is_noop() {
        let table = AssignmentTable::new();
        table.ack_revision("ghost", 5).await; // must not panic
        assert!(table.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn remove_then_get_is_none() {
        let table = AssignmentTable::new();
        table.insert(Assignment::new("d1", "n1", 0)).await;
        assert!(table.remove("d1").await.is_some());
        assert!(table.get("d1").await.is_none());
    }
}
