//! The per-node outbound handle that sits on the wire side of a node
//! session: the writer half of a node's `Connect` response stream, keyed by
//! `node_id`. Lives next to the generated wire types rather than in
//! `symphony-conductor` so `symphony-http` can address a node's session
//! without depending on the conductor binary crate.

use tokio::sync::mpsc;
use tonic::Status;

use crate::generated::ConductorToNode;

/// Cloneable handle a [`symphony_core::NodeRegistry`] holds per connected
/// node, and through which the conductor pushes `ConductorToNode` frames.
#[derive(Clone)]
pub struct SessionHandle {
    pub node_id: String,
    pub to_node: mpsc::Sender<Result<ConductorToNode, Status>>,
}
