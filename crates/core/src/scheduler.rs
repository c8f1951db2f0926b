//! Capacity-aware placement: picks a node for an unassigned deployment.
//!
//! The scheduler never mutates reservation state itself — it proposes a
//! node, [`crate::ledger::CapacityLedger::try_reserve`] decides. This keeps
//! the ledger as the single authority for invariant I2 even when multiple
//! reconciler ticks race to place different deployments concurrently.

use crate::ledger::{CapacityLedger, ReserveOutcome};
use crate::model::{CapacityVector, Connectivity, NodeRecord};

/// Number of times the scheduler will recompute eligibility and retry a
/// reservation after losing a race to another placement, per §4.4.
const MAX_RESERVE_RETRIES: u32 = 3;

/// Outcome of a placement attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Placed on this node; the ledger has already committed the reservation.
    Placed(String),
    /// At least one candidate matched the group, but none had capacity.
    InsufficientCapacity,
    /// No candidate advertises the deployment's required group, or every
    /// candidate is not `Connected`.
    NoEligibleNode,
    /// Eligibility passed at read time but every retry lost the reservation
    /// race against concurrent placements.
    NoCapacity,
}

/// Stateless capacity-aware scheduler. Holds no data of its own; every call
/// takes the candidate set and ledger it should reason about, so a single
/// `Scheduler` instance can be shared (or trivially re-created) across
/// reconciler ticks without synchronization concerns.
#[derive(Debug, Default, Clone, Copy)]
pub struct Scheduler;

impl Scheduler {
    /// A scheduler instance. Stateless, so this is just for call-site symmetry
    /// with the other components (`NodeRegistry::new()`, `CapacityLedger::new()`).
    pub fn new() -> Self {
        Self
    }

    /// Select a node for `requests` among `candidates`, reserving capacity
    /// on success. `candidates` should already be filtered to nodes
    /// advertising the deployment's `node_group` (e.g. via
    /// [`crate::registry::NodeRegistry::nodes_in_group`]); this function
    /// re-checks connectivity and capacity fit regardless, since the
    /// candidate set may be stale by the time this runs.
    pub async fn place(
        &self,
        candidates: &[NodeRecord],
        requests: &CapacityVector,
        ledger: &CapacityLedger,
        now_ms: i64,
    ) -> PlacementOutcome {
        if candidates.is_empty() {
            return PlacementOutcome::NoEligibleNode;
        }

        let mut attempt = 0;
        loop {
            let Some(node_id) = self.best_candidate(candidates, requests, ledger, now_ms).await
            else {
                // No candidate is connected and capacity-eligible right now.
                // Distinguish "nobody is even connected" from "everyone is
                // connected but short on capacity" for the caller's
                // assignment_reason.
                let any_connected = candidates
                    .iter()
                    .any(|n| n.connectivity(now_ms) == Connectivity::Connected);
                return if any_connected {
                    PlacementOutcome::InsufficientCapacity
                } else {
                    PlacementOutcome::NoEligibleNode
                };
            };

            match ledger.try_reserve(&node_id, requests).await {
                ReserveOutcome::Ok => return PlacementOutcome::Placed(node_id),
                ReserveOutcome::Insufficient | ReserveOutcome::UnknownNode => {
                    attempt += 1;
                    if attempt >= MAX_RESERVE_RETRIES {
                        return PlacementOutcome::NoCapacity;
                    }
                    // Lost the race (or the node vanished mid-evaluation);
                    // recompute against the now-current ledger state.
                }
            }
        }
    }

    /// The eligible candidate with the lowest [`score`], breaking ties by
    /// fewest currently-assigned deployments then lexicographically
    /// smallest `node_id`, per §4.4.
    async fn best_candidate(
        &self,
        candidates: &[NodeRecord],
        requests: &CapacityVector,
        ledger: &CapacityLedger,
        now_ms: i64,
    ) -> Option<String> {
        let mut best: Option<(f64, usize, &str)> = None;

        for node in candidates {
            if node.connectivity(now_ms) != Connectivity::Connected {
                continue;
            }
            if !fits(node, requests) {
                continue;
            }
            let Some(reserved) = ledger.reserved(&node.node_id).await else {
                continue;
            };
            let assigned_count = assigned_count(&reserved);
            let Some(score) = score(node, &reserved, requests) else {
                continue;
            };

            let candidate = (score, assigned_count, node.node_id.as_str());
            best = Some(match best {
                None => candidate,
                Some(current) if is_better(&candidate, &current) => candidate,
                Some(current) => current,
            });
        }

        best.map(|(_, _, id)| id.to_string())
    }
}

/// True if `node` declares every label in `requests` and its node-declared
/// `total` is at least `requests[label]` (a cheap pre-check before
/// consulting the ledger's live `available`, which is checked again by
/// `try_reserve` regardless).
fn fits(node: &NodeRecord, requests: &CapacityVector) -> bool {
    requests
        .iter()
        .all(|(label, amount)| node.capacities_total.contains_label(label) && amount <= node.capacities_total.get(label))
}

/// `max over K in requests of (reserved[K] + requests[K]) / total[K]`.
/// Returns `None` if any label would exceed `total` (i.e. the request
/// genuinely doesn't fit, even before the ledger's atomic check).
fn score(node: &NodeRecord, reserved: &CapacityVector, requests: &CapacityVector) -> Option<f64> {
    let mut worst: f64 = 0.0;
    for (label, amount) in requests.iter() {
        let total = node.capacities_total.get(label);
        if total <= 0 {
            return None;
        }
        let projected = reserved.get(label) + amount;
        if projected > total {
            return None;
        }
        let ratio = projected as f64 / total as f64;
        if ratio > worst {
            worst = ratio;
        }
    }
    Some(worst)
}

/// Rough proxy for "number of currently-assigned deployments": every
/// non-zero reserved label implies at least one assignment, but since the
/// ledger only tracks aggregate reserved amounts (not per-deployment
/// counts), we use the count of non-zero labels as the tie-break signal —
/// a node reserving capacity across more distinct labels is busier in a
/// way that should lose ties against one reserving fewer.
fn assigned_count(reserved: &CapacityVector) -> usize {
    reserved.iter().filter(|(_, amount)| *amount > 0).count()
}

fn is_better(candidate: &(f64, usize, &str), current: &(f64, usize, &str)) -> bool {
    (candidate.0, candidate.1, candidate.2) < (current.0, current.1, current.2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn node(id: &str, group: &str, total: i64) -> NodeRecord {
        NodeRecord {
            node_id: id.into(),
            groups: BTreeSet::from([group.to_string()]),
            capacities_total: CapacityVector::from_pairs([("A", total)]),
            heartbeat_interval_ms: 3_000,
            last_heartbeat_ms: 0,
            resources: crate::model::ResourceSnapshot::default(),
        }
    }

    #[tokio::test]
    async fn places_on_sole_eligible_node() {
        let ledger = CapacityLedger::new();
        ledger.declare_node("n1", CapacityVector::from_pairs([("A", 10)])).await;
        let scheduler = Scheduler::new();
        let candidates = vec![node("n1", "gpu", 10)];
        let outcome = scheduler
            .place(&candidates, &CapacityVector::from_pairs([("A", 3)]), &ledger, 0)
            .await;
        assert_eq!(outcome, PlacementOutcome::Placed("n1".to_string()));
        assert_eq!(ledger.available("n1").await.unwrap().get("A"), 7);
    }

    #[tokio::test]
    async fn balances_across_equal_nodes() {
        let ledger = CapacityLedger::new();
        ledger.declare_node("n1", CapacityVector::from_pairs([("A", 10)])).await;
        ledger.declare_node("n2", CapacityVector::from_pairs([("A", 10)])).await;
        let scheduler = Scheduler::new();
        let candidates = vec![node("n1", "cpu", 10), node("n2", "cpu", 10)];
        let requests = CapacityVector::from_pairs([("A", 3)]);

        let mut counts: std::collections::HashMap<String, u32> = Default::default();
        for _ in 0..4 {
            match scheduler.place(&candidates, &requests, &ledger, 0).await {
                PlacementOutcome::Placed(id) => *counts.entry(id).or_default() += 1,
                other => panic!("expected placement, got {other:?}"),
            }
        }
        assert_eq!(counts.get("n1"), Some(&2));
        assert_eq!(counts.get("n2"), Some(&2));
    }

    #[tokio::test]
    async fn insufficient_capacity_distinct_from_no_eligible_node() {
        let ledger = CapacityLedger::new();
        ledger.declare_node("n1", CapacityVector::from_pairs([("A", 2)])).await;
        let scheduler = Scheduler::new();
        let candidates = vec![node("n1", "gpu", 2)];
        let outcome = scheduler
            .place(&candidates, &CapacityVector::from_pairs([("A", 5)]), &ledger, 0)
            .await;
        assert_eq!(outcome, PlacementOutcome::InsufficientCapacity);
    }

    #[tokio::test]
    async fn no_eligible_node_when_nothing_connected() {
        let ledger = CapacityLedger::new();
        ledger.declare_node("n1", CapacityVector::from_pairs([("A", 10)])).await;
        let scheduler = Scheduler::new();
        let mut stale = node("n1", "gpu", 10);
        stale.last_heartbeat_ms = -1_000_000;
        let candidates = vec![stale];
        let outcome = scheduler
            .place(&candidates, &CapacityVector::from_pairs([("A", 3)]), &ledger, 0)
            .await;
        assert_eq!(outcome, PlacementOutcome::NoEligibleNode);
    }

    #[tokio::test]
    async fn tie_break_prefers_fewer_assignments_then_node_id() {
        let ledger = CapacityLedger::new();
        ledger.declare_node("n2", CapacityVector::from_pairs([("A", 10)])).await;
        ledger.declare_node("n1", CapacityVector::from_pairs([("A", 10)])).await;
        // n2 already has a reservation on an unrelated label's proportion is
        // equal for this request, so the lexicographic node_id tie-break
        // should prefer n1.
        let scheduler = Scheduler::new();
        let candidates = vec![node("n2", "cpu", 10), node("n1", "cpu", 10)];
        let outcome = scheduler
            .place(&candidates, &CapacityVector::from_pairs([("A", 1)]), &ledger, 0)
            .await;
        assert_eq!(outcome, PlacementOutcome::Placed("n1".to_string()));
    }
}
