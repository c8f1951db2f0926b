//! Request/response shapes for the control HTTP boundary. Kept separate
//! from the core model so the wire JSON shape can evolve independently of
//! `symphony-core::model::Deployment`'s internal representation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use symphony_core::model::{CapacityVector, Connectivity, Deployment, DeploymentKind, DesiredState, NodeRecord};

/// `POST /deployments` request body.
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    pub name: String,
    pub kind: DeploymentKind,
    pub node_group: String,
    #[serde(default)]
    pub capacity_requests: CapacityVector,
    #[serde(default)]
    pub specification: Value,
    #[serde(default = "default_desired_state")]
    pub desired_state: DesiredState,
}

fn default_desired_state() -> DesiredState {
    DesiredState::Running
}

/// `PATCH /deployments/{id}` request body. Every field is optional; `None`
/// leaves that part of the record untouched, per `DeploymentPatch`.
#[derive(Debug, Deserialize, Default)]
pub struct PatchDeploymentRequest {
    pub desired_state: Option<DesiredState>,
    pub name: Option<String>,
    pub specification: Option<Value>,
}

/// Response body for a single deployment, verbatim from the store's record
/// (every field in `spec.md` §3 is already present on [`Deployment`]).
#[derive(Debug, Serialize)]
pub struct DeploymentResponse(pub Deployment);

impl From<Deployment> for DeploymentResponse {
    fn from(value: Deployment) -> Self {
        Self(value)
    }
}

/// `GET /deployments` response envelope.
#[derive(Debug, Serialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<Deployment>,
}

/// `GET /deployments` query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

/// One entry in the `GET /nodes` response: the registry's record plus its
/// derived connectivity and the ledger's live `reserved`/`available`
/// vectors (`spec.md` §6 "returns the registry snapshot plus capacity
/// vectors and dynamic resource data").
#[derive(Debug, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub record: NodeRecord,
    pub connectivity: Connectivity,
    pub reserved: CapacityVector,
    pub available: CapacityVector,
}

/// `GET /nodes` response envelope.
#[derive(Debug, Serialize)]
pub struct NodeListResponse {
    pub nodes: Vec<NodeView>,
}

/// Query parameters for the streaming log endpoint (`spec.md` §6 "optional
/// `tail=N` query").
#[derive(Debug, Deserialize)]
pub struct LogStreamQuery {
    #[serde(default)]
    pub tail: usize,
}

/// A batch frame on the log stream SSE endpoint, matching `spec.md` §6's
/// `{entries: [LogEntry…], error?}` shape.
#[derive(Debug, Serialize)]
pub struct LogStreamFrame {
    pub entries: Vec<symphony_core::model::LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A uniform error body for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}
