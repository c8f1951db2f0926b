//! Capacity ledger: the only authority that mutates reservation state.
//!
//! The scheduler proposes a node, the ledger decides whether the
//! reservation actually fits. All three operations
//! ([`CapacityLedger::try_reserve`], [`CapacityLedger::release`],
//! [`CapacityLedger::available`]) are linearizable per node: each node's
//! entry is guarded by its own lock, so contention on one node never blocks
//! bookkeeping for another.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::CapacityVector;

/// Outcome of a reservation attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Every requested label had enough headroom; the reservation is committed.
    Ok,
    /// At least one label was short; no partial reservation was made.
    Insufficient,
    /// The node is not tracked by the ledger (never declared, or already
    /// released via `forget`).
    UnknownNode,
}

struct NodeLedger {
    total: CapacityVector,
    reserved: CapacityVector,
}

/// Per-node available-capacity accounting.
pub struct CapacityLedger {
    nodes: RwLock<HashMap<String, NodeLedger>>,
}

impl CapacityLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Begin tracking a node with the given declared total capacity. Called
    /// once at `NodeHello` acceptance time. Resets any prior reservation
    /// state for this `node_id` — a node reconnecting after a full
    /// disconnect starts with a clean ledger entry, since the reconciler is
    /// responsible for re-deriving reservations from live assignments.
    pub async fn declare_node(&self, node_id: impl Into<String>, total: CapacityVector) {
        let mut nodes = self.nodes.write().await;
        nodes.insert(
            node_id.into(),
            NodeLedger {
                total,
                reserved: CapacityVector::new(),
            },
        );
    }

    /// Stop tracking a node entirely (on deregistration).
    pub async fn forget_node(&self, node_id: &str) {
        self.nodes.write().await.remove(node_id);
    }

    /// Atomically check every label in `requests` against that node's
    /// available capacity; on success, commits all increments together. No
    /// label is reserved if any label is short (all-or-nothing), preserving
    /// invariant I2.
    pub async fn try_reserve(&self, node_id: &str, requests: &CapacityVector) -> ReserveOutcome {
        let mut nodes = self.nodes.write().await;
        let Some(ledger) = nodes.get_mut(node_id) else {
            return ReserveOutcome::UnknownNode;
        };

        for (label, amount) in requests.iter() {
            let available = ledger.total.get(label) - ledger.reserved.get(label);
            if amount > available {
                return ReserveOutcome::Insufficient;
            }
        }

        ledger.reserved.saturating_add(requests);
        ReserveOutcome::Ok
    }

    /// Release a previously committed reservation. Guaranteed to never
    /// drive `reserved` negative even if called twice for the same request
    /// (defensive against a duplicate release racing a reassignment).
    pub async fn release(&self, node_id: &str, requests: &CapacityVector) {
        let mut nodes = self.nodes.write().await;
        if let Some(ledger) = nodes.get_mut(node_id) {
            ledger.reserved.saturating_sub(requests);
        }
    }

    /// A snapshot of `total - reserved` for `node_id`, or `None` if the node
    /// isn't tracked.
    pub async fn available(&self, node_id: &str) -> Option<CapacityVector> {
        let nodes = self.nodes.read().await;
        let ledger = nodes.get(node_id)?;
        let mut available = ledger.total.clone();
        available.saturating_sub(&ledger.reserved);
        Some(available)
    }

    /// A snapshot of the reserved vector for `node_id`, or `None` if the
    /// node isn't tracked. Exposed mainly for the scheduler's scoring
    /// function, which needs `reserved + requests` per label.
    pub async fn reserved(&self, node_id: &str) -> Option<CapacityVector> {
        self.nodes.read().await.get(node_id).map(|l| l.reserved.clone())
    }
}

impl Default for CapacityLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to a [`CapacityLedger`], cloneable across tasks.
pub type SharedLedger = Arc<CapacityLedger>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_then_release_round_trips() {
        let ledger = CapacityLedger::new();
        ledger
            .declare_node("n1", CapacityVector::from_pairs([("cpu", 10)]))
            .await;

        let req = CapacityVector::from_pairs([("cpu", 4)]);
        assert_eq!(ledger.try_reserve("n1", &req).await, ReserveOutcome::Ok);
        assert_eq!(ledger.available("n1").await.unwrap().get("cpu"), 6);

        ledger.release("n1", &req).await;
        assert_eq!(ledger.available("n1").await.unwrap().get("cpu"), 10);
    }

    #[tokio::test]
    async fn reserve_is_all_or_nothing() {
        let ledger = CapacityLedger::new();
        ledger
            .declare_node(
                "n1",
                CapacityVector::from_pairs([("cpu", 10), ("gpu", 1)]),
            )
            .await;

        // gpu is short; cpu must NOT be partially reserved.
        let req = CapacityVector::from_pairs([("cpu", 5), ("gpu", 2)]);
        assert_eq!(
            ledger.try_reserve("n1", &req).await,
            ReserveOutcome::Insufficient
        );
        assert_eq!(ledger.available("n1").await.unwrap().get("cpu"), 10);
        assert_eq!(ledger.available("n1").await.unwrap().get("gpu"), 1);
    }

    #[tokio::test]
    async fn unknown_node_is_reported_distinctly() {
        let ledger = CapacityLedger::new();
        let req = CapacityVector::from_pairs([("cpu", 1)]);
        assert_eq!(
            ledger.try_reserve("ghost", &req).await,
            ReserveOutcome::UnknownNode
        );
    }

    #[tokio::test]
    async fn release_never_goes_negative() {
        let ledger = CapacityLedger::new();
        ledger
            .declare_node("n1", CapacityVector::from_pairs([("cpu", 10)]))
            .await;
        let req = CapacityVector::from_pairs([("cpu", 4)]);
        ledger.release("n1", &req).await; // release without a prior reserve
        assert_eq!(ledger.available("n1").await.unwrap().get("cpu"), 10);
    }

    #[tokio::test]
    async fn concurrent_reserves_never_oversubscribe() {
        let ledger = Arc::new(CapacityLedger::new());
        ledger
            .declare_node("n1", CapacityVector::from_pairs([("cpu", 10)]))
            .await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let req = CapacityVector::from_pairs([("cpu", 1)]);
                ledger.try_reserve("n1", &req).await
            }));
        }

        let mut ok_count = 0;
        for h in handles {
            if h.await.unwrap() == ReserveOutcome::Ok {
                ok_count += 1;
            }
        }

        assert_eq!(ok_count, 10, "only 10 of 20 requests for 1 cpu each should succeed against a total of 10");
        assert_eq!(ledger.available("n1").await.unwrap().get("cpu"), 0);
    }

    proptest::proptest! {
        /// P1 — ledger non-negativity: for any interleaving of reserve/release
        /// amounts, `available` stays within `[0, total]` after every step.
        #[test]
        fn p1_available_stays_within_bounds(ops in proptest::collection::vec(-5i64..=5i64, 0..50)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let ledger = CapacityLedger::new();
                let total = CapacityVector::from_pairs([("cpu", 10)]);
                ledger.declare_node("n1", total.clone()).await;

                for op in ops {
                    if op >= 0 {
                        let req = CapacityVector::from_pairs([("cpu", op)]);
                        let _ = ledger.try_reserve("n1", &req).await;
                    } else {
                        let req = CapacityVector::from_pairs([("cpu", -op)]);
                        ledger.release("n1", &req).await;
                    }
                    let reserved = ledger.reserved("n1").await.unwrap();
                    prop_assert!(reserved.within_bounds(&total));
                }
                Ok(())
            })?;
        }
    }
}
