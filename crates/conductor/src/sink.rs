//! The conductor's concrete `CommandSink`: turns a reconciler [`Command`]
//! into a wire `ConductorToNode` frame and delivers it through the
//! target node's registered [`SessionHandle`].

use async_trait::async_trait;

use symphony_core::store::SharedStore;
use symphony_core::SharedRegistry;
use symphony_proto::generated::{
    conductor_to_node, ConductorToNode, DeploymentCancel, DeploymentCommandKind, DeploymentReq,
};
use symphony_proto::encode_capacity;
use symphony_reconciler::{Command, CommandSink, SendError};

use crate::session::SessionHandle;

/// Delivers reconciler commands to real node sessions via the registry's
/// per-node [`SessionHandle`].
pub struct ConductorSink {
    registry: SharedRegistry<SessionHandle>,
    store: SharedStore,
}

impl ConductorSink {
    pub fn new(registry: SharedRegistry<SessionHandle>, store: SharedStore) -> Self {
        Self { registry, store }
    }

    async fn build_frame(&self, command: &Command) -> Result<ConductorToNode, SendError> {
        let deployment_id = command.deployment_id().to_string();
        let frame = match command {
            Command::Start { spec_revision, .. } | Command::Update { spec_revision, .. } => {
                let deployment = self.store.get(&deployment_id).await.ok_or_else(|| SendError {
                    node_id: deployment_id.clone(),
                    reason: "deployment record not found".to_string(),
                })?;
                let kind = if matches!(command, Command::Start { .. }) {
                    DeploymentCommandKind::Start
                } else {
                    DeploymentCommandKind::Update
                };
                conductor_to_node::Frame::DeploymentReq(DeploymentReq {
                    deployment_id,
                    kind: kind as i32,
                    spec_revision: *spec_revision,
                    specification_json: deployment.specification.to_string(),
                    deployment_kind: match deployment.kind {
                        symphony_core::model::DeploymentKind::Exec => "exec".to_string(),
                        symphony_core::model::DeploymentKind::Docker => "docker".to_string(),
                    },
                    capacity_requests: encode_capacity(&deployment.capacity_requests),
                })
            }
            Command::Stop { spec_revision, .. } => {
                let deployment = self.store.get(&deployment_id).await.ok_or_else(|| SendError {
                    node_id: deployment_id.clone(),
                    reason: "deployment record not found".to_string(),
                })?;
                conductor_to_node::Frame::DeploymentReq(DeploymentReq {
                    deployment_id,
                    kind: DeploymentCommandKind::Stop as i32,
                    spec_revision: *spec_revision,
                    specification_json: deployment.specification.to_string(),
                    deployment_kind: match deployment.kind {
                        symphony_core::model::DeploymentKind::Exec => "exec".to_string(),
                        symphony_core::model::DeploymentKind::Docker => "docker".to_string(),
                    },
                    capacity_requests: encode_capacity(&deployment.capacity_requests),
                })
            }
            Command::Cancel { .. } => conductor_to_node::Frame::DeploymentCancel(DeploymentCancel { deployment_id }),
        };
        Ok(ConductorToNode { frame: Some(frame) })
    }
}

#[async_trait]
impl CommandSink for ConductorSink {
    async fn send(&self, node_id: &str, command: Command) -> Result<(), SendError> {
        let handle = self.registry.handle(node_id).await.ok_or_else(|| SendError {
            node_id: node_id.to_string(),
            reason: "node not registered".to_string(),
        })?;

        let frame = self.build_frame(&command).await?;

        handle.to_node.try_send(Ok(frame)).map_err(|_| SendError {
            node_id: node_id.to_string(),
            reason: "session outbound queue full or closed".to_string(),
        })
    }
}
