//! Per-node circuit breaker, grounded on the teacher's
//! `executor::retry::CircuitBreaker`: bounds how aggressively the
//! reconciler hammers a node whose writer channel keeps failing.
//!
//! This is additive over the documented reconciler transition table
//! (`spec.md` §4.6) — it never changes *what* command gets issued, only
//! whether the reconciler attempts delivery this tick. A tripped node is
//! treated as ineligible for new placements, the same as `Stale`.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Consecutive send failures to a node before its breaker trips.
pub const FAILURE_THRESHOLD: u32 = 3;
/// How long a tripped breaker stays open before the next send is allowed
/// to probe the node again.
pub const COOLDOWN_MS: i64 = 10_000;

#[derive(Default, Clone, Copy)]
struct NodeState {
    consecutive_failures: u32,
    open_until_ms: i64,
}

/// Tracks consecutive command-delivery failures per node.
#[derive(Default)]
pub struct CircuitBreaker {
    nodes: RwLock<HashMap<String, NodeState>>,
}

impl CircuitBreaker {
    /// A breaker with no tripped nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether commands may currently be sent to `node_id`.
    pub async fn is_open(&self, node_id: &str, now_ms: i64) -> bool {
        match self.nodes.read().await.get(node_id) {
            Some(state) => now_ms < state.open_until_ms,
            None => false,
        }
    }

    /// Record a successful delivery; clears any accumulated failure count.
    pub async fn record_success(&self, node_id: &str) {
        self.nodes.write().await.remove(node_id);
    }

    /// Record a failed delivery; trips the breaker once
    /// [`FAILURE_THRESHOLD`] consecutive failures accumulate.
    pub async fn record_failure(&self, node_id: &str, now_ms: i64) {
        let mut nodes = self.nodes.write().await;
        let state = nodes.entry(node_id.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= FAILURE_THRESHOLD {
            state.open_until_ms = now_ms + COOLDOWN_MS;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure("n1", 0).await;
        }
        assert!(!breaker.is_open("n1", 0).await, "should not trip before threshold");
        breaker.record_failure("n1", 0).await;
        assert!(breaker.is_open("n1", 0).await);
    }

    #[tokio::test]
    async fn closes_after_cooldown() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure("n1", 0).await;
        }
        assert!(breaker.is_open("n1", 0).await);
        assert!(!breaker.is_open("n1", COOLDOWN_MS).await);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure("n1", 0).await;
        breaker.record_failure("n1", 0).await;
        breaker.record_success("n1").await;
        breaker.record_failure("n1", 0).await;
        assert!(!breaker.is_open("n1", 0).await, "reset count should require a fresh threshold run");
    }
}
