//! Node records: declared identity/capacity plus runtime-observed state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::capacity::CapacityVector;

/// Minimum recognized heartbeat interval, in milliseconds.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
/// Maximum recognized heartbeat interval, in milliseconds.
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Default heartbeat interval used when a node doesn't declare one.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;

/// A single GPU's static identity and dynamic memory usage, as reported in
/// a node's resource snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    /// Device index as reported by the node's OS.
    pub index: u32,
    /// Human-readable device name.
    pub name: String,
    /// Bytes of GPU memory currently in use.
    pub memory_used_bytes: u64,
    /// Total GPU memory, in bytes.
    pub memory_total_bytes: u64,
}

/// A single storage mount's usage, as reported in a node's resource snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageMount {
    /// Mount path on the node's filesystem.
    pub path: String,
    /// Bytes currently used.
    pub used_bytes: u64,
    /// Total capacity of the mount, in bytes.
    pub total_bytes: u64,
}

/// Dynamic resource usage reported by a node on every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Aggregate CPU utilization, 0.0-100.0.
    pub cpu_percent: f64,
    /// Per-core utilization, 0.0-100.0 each.
    pub per_core_percent: Vec<f64>,
    /// Bytes of RAM currently in use.
    pub memory_used_bytes: u64,
    /// Total RAM, in bytes.
    pub memory_total_bytes: u64,
    /// Attached GPUs, if any.
    pub gpus: Vec<GpuInfo>,
    /// Mounted storage volumes.
    pub storage_mounts: Vec<StorageMount>,
}

impl Default for ResourceSnapshot {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            per_core_percent: Vec::new(),
            memory_used_bytes: 0,
            memory_total_bytes: 0,
            gpus: Vec::new(),
            storage_mounts: Vec::new(),
        }
    }
}

/// Session-level connectivity state of a node, derived from heartbeat
/// timing rather than stored as an independent field — see
/// [`NodeRecord::connectivity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Frames have arrived within `heartbeat_interval`. Eligible for new placements.
    Connected,
    /// No frame for `3 * heartbeat_interval`. Still holds assignments, not
    /// eligible for new placements.
    Stale,
    /// No frame for `10 * heartbeat_interval`, or a transport error. Assignments
    /// are released after the disconnect grace window.
    Disconnected,
}

/// A connected (or recently connected) node's declared identity and
/// runtime-observed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Opaque, unique node identifier asserted by `NodeHello`.
    pub node_id: String,
    /// Ordered set of group labels this node advertises for placement affinity.
    pub groups: BTreeSet<String>,
    /// Declared total capacity per label. Immutable for the life of the session.
    pub capacities_total: CapacityVector,
    /// Node-declared heartbeat cadence.
    pub heartbeat_interval_ms: u64,
    /// Unix millis of the last frame received from this node (any frame, not just heartbeats).
    pub last_heartbeat_ms: i64,
    /// Most recently reported dynamic resource usage.
    pub resources: ResourceSnapshot,
}

impl NodeRecord {
    /// Derive this node's connectivity state from `now_ms` and its last
    /// observed frame time, per the timeout table: stale at `3x`, disconnected
    /// at `10x` the heartbeat interval.
    pub fn connectivity(&self, now_ms: i64) -> Connectivity {
        let elapsed = now_ms.saturating_sub(self.last_heartbeat_ms);
        let interval = self.heartbeat_interval_ms as i64;
        if elapsed >= 10 * interval {
            Connectivity::Disconnected
        } else if elapsed >= 3 * interval {
            Connectivity::Stale
        } else {
            Connectivity::Connected
        }
    }

    /// Validate a declared heartbeat interval against the recognized range,
    /// clamping is deliberately NOT performed here — an out-of-range value
    /// should fail the handshake rather than silently be coerced.
    pub fn heartbeat_interval_in_range(interval_ms: u64) -> bool {
        (MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(last_heartbeat_ms: i64) -> NodeRecord {
        NodeRecord {
            node_id: "n1".into(),
            groups: BTreeSet::from(["gpu".to_string()]),
            capacities_total: CapacityVector::from_pairs([("A", 10)]),
            heartbeat_interval_ms: 3_000,
            last_heartbeat_ms,
            resources: ResourceSnapshot::default(),
        }
    }

    #[test]
    fn connectivity_thresholds() {
        let n = node(0);
        assert_eq!(n.connectivity(0), Connectivity::Connected);
        assert_eq!(n.connectivity(2_999), Connectivity::Connected);
        assert_eq!(n.connectivity(9_000), Connectivity::Stale);
        assert_eq!(n.connectivity(29_999), Connectivity::Stale);
        assert_eq!(n.connectivity(30_000), Connectivity::Disconnected);
    }

    #[test]
    fn heartbeat_interval_bounds() {
        assert!(!NodeRecord::heartbeat_interval_in_range(999));
        assert!(NodeRecord::heartbeat_interval_in_range(1_000));
        assert!(NodeRecord::heartbeat_interval_in_range(30_000));
        assert!(!NodeRecord::heartbeat_interval_in_range(30_001));
    }
}
