//! The live (deployment -> node) relation.

use serde::{Deserialize, Serialize};

/// The logical relation placing one deployment on one node.
///
/// `Assignment` is never owned by `NodeRecord` or `Deployment` directly —
/// both reference each other only by id, and a join happens at read time in
/// the reconciler. This keeps node loss and deployment deletion from
/// requiring coordinated updates to two owning structures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// Deployment this assignment is for.
    pub deployment_id: String,
    /// Node holding the assignment.
    pub node_id: String,
    /// When the assignment was created, unix millis.
    pub assigned_at_ms: i64,
    /// The `spec_revision` the node has confirmed applying.
    pub revision_acked: u64,
}

impl Assignment {
    /// A fresh assignment with no revision acknowledged yet.
    pub fn new(deployment_id: impl Into<String>, node_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            node_id: node_id.into(),
            assigned_at_ms: now_ms,
            revision_acked: 0,
        }
    }

    /// Record a higher acknowledged revision. Enforces invariant P3
    /// (revision monotonicity) at the call site: acks that regress are
    /// ignored rather than applied.
    pub fn ack_revision(&mut self, revision: u64) {
        if revision > self.revision_acked {
            self.revision_acked = revision;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_revision_never_decreases() {
        let mut a = Assignment::new("d1", "n1", 0);
        a.ack_revision(5);
        assert_eq!(a.revision_acked, 5);
        a.ack_revision(3);
        assert_eq!(a.revision_acked, 5, "stale ack must not regress revision_acked");
        a.ack_revision(7);
        assert_eq!(a.revision_acked, 7);
    }
}
