//! Deployment records: desired state, observed state, and placement.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::capacity::CapacityVector;

/// The execution backend a deployment's specification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentKind {
    /// Bare child process on the node host.
    Exec,
    /// Container runtime (bollard/Docker) on the node host.
    Docker,
}

/// User-requested lifecycle target for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredState {
    /// The deployment should be assigned and running.
    Running,
    /// The deployment should be stopped (but its record retained).
    Stopped,
}

/// Last-reported lifecycle state of a deployment, mirroring the node
/// supervisor's per-deployment state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentState {
    /// Not yet assigned, or assigned but no status reported yet.
    Pending,
    /// Assigned and the node has begun starting the child/container.
    Starting,
    /// Running and past its startup grace period.
    Running,
    /// A stop has been requested and is in flight.
    Stopping,
    /// Stopped cleanly.
    Stopped,
    /// Exited non-zero, or failed to start.
    Failed,
    /// Assigned to a node, but the conductor has not heard a status since
    /// reassignment or restart; distinct from `Pending`, which means never
    /// assigned at all.
    Unknown,
}

/// Well-known `assignment_reason` values. Kept as associated constants
/// rather than an enum because the field is documented as a human-readable
/// string and external tooling may display arbitrary reasons.
pub mod reason {
    /// No node advertises the deployment's required group.
    pub const NO_ELIGIBLE_NODE: &str = "no-eligible-node";
    /// At least one node matches the group, but none has capacity headroom.
    pub const INSUFFICIENT_CAPACITY: &str = "insufficient-capacity";
    /// All eligibility checks passed but the ledger lost the reservation race
    /// on every retry.
    pub const NO_CAPACITY: &str = "no-capacity";
    /// The node holding the assignment disconnected past its grace window.
    pub const NODE_DISCONNECTED: &str = "node-disconnected";
}

/// A deployment: the unit of schedulable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Server-assigned unique identifier.
    pub id: String,
    /// User-chosen name, unique among non-deleted records.
    pub name: String,
    /// Execution backend.
    pub kind: DeploymentKind,
    /// Single group label required for placement.
    pub node_group: String,
    /// Per-label capacity request.
    pub capacity_requests: CapacityVector,
    /// Opaque specification interpreted by the node supervisor per `kind`.
    pub specification: Value,
    /// User-requested lifecycle target.
    pub desired_state: DesiredState,
    /// Last-reported lifecycle state.
    pub current_state: CurrentState,
    /// Node currently holding this deployment's assignment, if any.
    pub assigned_node_id: Option<String>,
    /// Why the deployment is unassigned, when `assigned_node_id` is `None`.
    pub assignment_reason: Option<String>,
    /// Most recent exit code reported by the node supervisor, if any.
    pub exit_code: Option<i32>,
    /// Creation timestamp, unix millis.
    pub created_at_ms: i64,
    /// Last-update timestamp, unix millis.
    pub updated_at_ms: i64,
    /// Monotonically increasing revision, bumped on every accepted content
    /// or desired-state change.
    pub spec_revision: u64,
    /// Tombstoned pending node-side teardown confirmation. While `true`,
    /// `name` remains reserved and cannot be reused by a new deployment.
    pub deleted: bool,
}

impl Deployment {
    /// True if this deployment currently holds a live assignment.
    pub fn is_assigned(&self) -> bool {
        self.assigned_node_id.is_some()
    }

    /// Clear the assignment and record why, per invariant I1: every
    /// RUNNING-desired deployment is either assigned or carries a reason.
    pub fn unassign(&mut self, reason: &str, now_ms: i64) {
        self.assigned_node_id = None;
        self.assignment_reason = Some(reason.to_string());
        self.updated_at_ms = now_ms;
    }

    /// Record a successful placement onto `node_id`, clearing any stale reason.
    pub fn assign(&mut self, node_id: impl Into<String>, now_ms: i64) {
        self.assigned_node_id = Some(node_id.into());
        self.assignment_reason = None;
        self.updated_at_ms = now_ms;
    }
}
