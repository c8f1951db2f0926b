//! Route table and handlers for the control HTTP boundary.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tokio_stream::StreamExt as _;

use symphony_core::store::{CreateOutcome, DeploymentPatch, NewDeployment, UpdateOutcome};

use crate::dto::{
    CreateDeploymentRequest, DeploymentListResponse, DeploymentResponse, ErrorResponse, ListQuery,
    LogStreamFrame, LogStreamQuery, NodeListResponse, NodeView, PatchDeploymentRequest,
};
use crate::state::AppState;

/// Build the route table. Split out of [`crate::router`] so tests can mount
/// it without the tracing layer.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deployments", post(create_deployment).get(list_deployments))
        .route(
            "/deployments/{id}",
            get(get_deployment).patch(patch_deployment).delete(delete_deployment),
        )
        .route("/deployments/{id}/logs", get(stream_logs))
        .route("/nodes", get(list_nodes))
        .route("/stream", get(stream_snapshot))
}

/// Uniform error response. Deliberately coarse-grained: the real HTTP layer
/// (out of scope per `spec.md` §1) owns rich problem-detail responses,
/// input validation edge cases, and auth.
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse::new(self.1))).into_response()
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, format!("{what} not found"))
}

fn conflict(what: &str) -> ApiError {
    ApiError(StatusCode::CONFLICT, format!("{what} conflict"))
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

async fn create_deployment(
    State(state): State<AppState>,
    Json(req): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "name must not be empty".to_string()));
    }
    if req.node_group.trim().is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "node_group must not be empty".to_string()));
    }

    let new = NewDeployment {
        name: req.name,
        kind: req.kind,
        node_group: req.node_group,
        capacity_requests: req.capacity_requests,
        specification: req.specification,
        desired_state: req.desired_state,
    };

    match state.store.create(new, now_ms()).await {
        CreateOutcome::Created(record) => {
            state.wake_reconciler().await;
            Ok((StatusCode::CREATED, Json(record.into())))
        }
        CreateOutcome::NameConflict => Err(conflict("name")),
    }
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<DeploymentListResponse> {
    let deployments = state.store.list(query.limit, query.offset).await;
    Json(DeploymentListResponse { deployments })
}

async fn get_deployment(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<DeploymentResponse>, ApiError> {
    state.store.get(&id).await.map(|d| Json(d.into())).ok_or_else(|| not_found("deployment"))
}

async fn patch_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchDeploymentRequest>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let patch = DeploymentPatch {
        desired_state: req.desired_state,
        name: req.name,
        specification: req.specification,
    };

    match state.store.update(&id, patch, now_ms()).await {
        UpdateOutcome::Updated(_) => {
            state.wake_reconciler().await;
            let record = state.store.get(&id).await.ok_or_else(|| not_found("deployment"))?;
            Ok(Json(record.into()))
        }
        UpdateOutcome::NameConflict => Err(conflict("name")),
        UpdateOutcome::NotFound => Err(not_found("deployment")),
    }
}

async fn delete_deployment(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    if state.store.get(&id).await.is_none() {
        return Err(not_found("deployment"));
    }
    state.store.delete(&id, now_ms()).await;
    state.wake_reconciler().await;
    Ok(StatusCode::ACCEPTED)
}

async fn list_nodes(State(state): State<AppState>) -> Json<NodeListResponse> {
    let now = now_ms();
    let mut nodes = Vec::new();
    for record in state.registry.snapshot().await {
        let available = state.ledger.available(&record.node_id).await.unwrap_or_default();
        let reserved = state.ledger.reserved(&record.node_id).await.unwrap_or_default();
        let connectivity = record.connectivity(now);
        nodes.push(NodeView { record, connectivity, reserved, available });
    }
    Json(NodeListResponse { nodes })
}

/// `GET /deployments/{id}/logs?tail=N`: a tail-then-follow SSE stream of
/// `LogStreamFrame`s, per `spec.md` §6.
async fn stream_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogStreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    let deployment = state.store.get(&id).await.ok_or_else(|| not_found("deployment"))?;
    let (frame_tx, frame_rx) = mpsc::channel::<LogStreamFrame>(64);

    let Some(node_id) = deployment.assigned_node_id.clone() else {
        let _ = frame_tx
            .try_send(LogStreamFrame { entries: Vec::new(), error: Some("deployment is not currently assigned to a node".to_string()) });
        let stream = ReceiverStream::new(frame_rx).map(frame_to_event);
        return Ok(Sse::new(stream));
    };

    let (backfill, mut rx) = state.log_hub.subscribe_via_node(&state.registry, &node_id, &id, query.tail).await;

    tokio::spawn(async move {
        if !backfill.is_empty() && frame_tx.send(LogStreamFrame { entries: backfill, error: None }).await.is_err() {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(entry) => {
                    if frame_tx.send(LogStreamFrame { entries: vec![entry], error: None }).await.is_err() {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    let _ = frame_tx.send(LogStreamFrame { entries: Vec::new(), error: Some("slow-consumer".to_string()) }).await;
                    return;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    let stream = ReceiverStream::new(frame_rx).map(frame_to_event);
    Ok(Sse::new(stream))
}

fn frame_to_event(frame: LogStreamFrame) -> Result<Event, std::convert::Infallible> {
    Ok(Event::default().json_data(&frame).unwrap_or_default())
}

/// `GET /stream`: a full deployments+nodes view pushed on a fixed poll
/// cadence, standing in for `spec.md` §6's "snapshot stream delivering the
/// full deployments+nodes view on every change" — polling rather than true
/// change-notification, which is an acceptable simplification for this
/// boundary seam (real change-triggered push belongs to the out-of-scope
/// HTTP layer this module stands in for).
async fn stream_snapshot(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let ticker = IntervalStream::new(tokio::time::interval(Duration::from_secs(1)));
    let events = ticker.then(move |_| {
        let state = state.clone();
        async move {
            let deployments = state.store.list(10_000, 0).await;
            let now = now_ms();
            let mut nodes = Vec::new();
            for record in state.registry.snapshot().await {
                let available = state.ledger.available(&record.node_id).await.unwrap_or_default();
                let reserved = state.ledger.reserved(&record.node_id).await.unwrap_or_default();
                let connectivity = record.connectivity(now);
                nodes.push(NodeView { record, connectivity, reserved, available });
            }
            let body = serde_json::json!({
                "deployments": deployments,
                "nodes": nodes,
            });
            Ok(Event::default().json_data(&body).unwrap_or_default())
        }
    });
    Sse::new(events)
}
