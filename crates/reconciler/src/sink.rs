//! The reconciler's view of "send a command to a node": an abstract sink so
//! this crate never depends on the transport (`symphony-conductor` wires it
//! to real session writer channels; tests use an in-memory recorder).

use async_trait::async_trait;
use symphony_core::model::Deployment;

/// A command issued to a node, carrying `(deployment_id, spec_revision)` per
/// §4.6's idempotence rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a deployment at the given revision.
    Start {
        deployment_id: String,
        spec_revision: u64,
    },
    /// Push an updated specification/desired-state at the given revision.
    Update {
        deployment_id: String,
        spec_revision: u64,
    },
    /// Request a graceful stop. Always applies regardless of revision.
    Stop {
        deployment_id: String,
        spec_revision: u64,
    },
    /// Cancel in-flight start/update and tear the deployment down entirely.
    /// Always applies regardless of revision.
    Cancel { deployment_id: String },
}

impl Command {
    /// The deployment this command targets.
    pub fn deployment_id(&self) -> &str {
        match self {
            Command::Start { deployment_id, .. }
            | Command::Update { deployment_id, .. }
            | Command::Stop { deployment_id, .. }
            | Command::Cancel { deployment_id } => deployment_id,
        }
    }
}

/// Failure to deliver a command to a node's writer channel (e.g. the
/// session's bounded outbound queue is full or the session already closed).
#[derive(Debug, thiserror::Error)]
#[error("failed to deliver command to node {node_id}: {reason}")]
pub struct SendError {
    pub node_id: String,
    pub reason: String,
}

/// Delivers reconciler-issued commands to a specific node's session.
///
/// Implementations must not block the reconciler tick on a slow or wedged
/// node — per §5, the session writer suspends on its own bounded queue, and
/// a full queue should surface as [`SendError`] rather than stall here.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Deliver a command to `node_id`.
    async fn send(&self, node_id: &str, command: Command) -> Result<(), SendError>;
}

/// Build the full command for a fresh placement.
pub fn start_command(deployment: &Deployment) -> Command {
    Command::Start {
        deployment_id: deployment.id.clone(),
        spec_revision: deployment.spec_revision,
    }
}

/// Build the command for pushing a content/desired-state change to an
/// already-assigned node.
pub fn update_command(deployment: &Deployment) -> Command {
    Command::Update {
        deployment_id: deployment.id.clone(),
        spec_revision: deployment.spec_revision,
    }
}

/// Build the command for a graceful stop.
pub fn stop_command(deployment: &Deployment) -> Command {
    Command::Stop {
        deployment_id: deployment.id.clone(),
        spec_revision: deployment.spec_revision,
    }
}

/// Build the command for an outright cancellation (deletion).
pub fn cancel_command(deployment_id: &str) -> Command {
    Command::Cancel {
        deployment_id: deployment_id.to_string(),
    }
}

#[cfg(test)]
pub mod recording {
    //! A `CommandSink` that records every delivery attempt in memory, for
    //! reconciler unit tests.

    use super::*;
    use tokio::sync::Mutex;

    /// Records every command handed to it, optionally failing delivery to
    /// specific nodes to exercise the circuit breaker.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<(String, Command)>>,
        pub fail_nodes: Mutex<std::collections::HashSet<String>>,
    }

    impl RecordingSink {
        pub async fn set_failing(&self, node_id: &str, failing: bool) {
            let mut nodes = self.fail_nodes.lock().await;
            if failing {
                nodes.insert(node_id.to_string());
            } else {
                nodes.remove(node_id);
            }
        }

        pub async fn commands_for(&self, node_id: &str) -> Vec<Command> {
            self.sent
                .lock()
                .await
                .iter()
                .filter(|(n, _)| n == node_id)
                .map(|(_, c)| c.clone())
                .collect()
        }
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send(&self, node_id: &str, command: Command) -> Result<(), SendError> {
            if self.fail_nodes.lock().await.contains(node_id) {
                return Err(SendError {
                    node_id: node_id.to_string(),
                    reason: "simulated failure".to_string(),
                });
            }
            self.sent
                .lock()
                .await
                .push((node_id.to_string(), command));
            Ok(())
        }
    }
}
