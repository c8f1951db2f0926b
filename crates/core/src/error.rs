//! Error types for the Symphony control plane.

use thiserror::Error;

/// Result type alias for Symphony control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Symphony control plane.
///
/// Variants map one-to-one onto the error categories in the design's error
/// handling section: transport, protocol, capacity, placement, execution and
/// validation failures each get their own shape so callers can populate
/// `assignment_reason` or a log field directly instead of parsing a string.
#[derive(Debug, Error)]
pub enum Error {
    /// A node session's stream read or write failed.
    #[error("transport error on node {node_id}: {reason}")]
    Transport {
        /// Node whose stream failed.
        node_id: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A frame violated the wire protocol (malformed, duplicate hello, bad capacities, ...).
    #[error("protocol violation on node {node_id}: {reason}")]
    Protocol {
        /// Node whose session is being closed.
        node_id: String,
        /// Why the session is being closed.
        reason: String,
    },

    /// The capacity ledger could not satisfy a reservation request.
    #[error("insufficient capacity on node {node_id} for label {label}: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Node that was attempted.
        node_id: String,
        /// Capacity label that was short.
        label: String,
        /// Amount requested.
        requested: i64,
        /// Amount actually available.
        available: i64,
    },

    /// No node satisfies a deployment's placement constraints.
    #[error("no eligible node for deployment {deployment_id}: {reason}")]
    NoEligibleNode {
        /// Deployment that could not be placed.
        deployment_id: String,
        /// Why no node qualified (group mismatch, all stale, ...).
        reason: String,
    },

    /// A deployment's child process or container failed to start or exited unexpectedly.
    #[error("execution failure for deployment {deployment_id} on node {node_id}: {reason}")]
    Execution {
        /// Deployment whose execution failed.
        deployment_id: String,
        /// Node the deployment was running on.
        node_id: String,
        /// Failure description.
        reason: String,
    },

    /// A request failed validation before any state was mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint (deployment name, node id) was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A conductor-wide invariant (I1-I5) was violated. This is fatal: the
    /// caller is expected to log and abort the process rather than recover,
    /// because continuing would mean operating on a control plane that no
    /// longer matches its own invariants.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization/deserialization of an opaque blob failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for errors that don't merit their own variant.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for [`Error::Transport`].
    pub fn transport(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Transport {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::Protocol`].
    pub fn protocol(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Protocol {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }
}
