//! Integration tests for the control HTTP boundary, driving the real
//! `axum::Router` via `tower::ServiceExt::oneshot` rather than mocking
//! handlers individually — the standard way to exercise an axum router
//! without binding a real socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;

use symphony_core::store::InMemoryStore;
use symphony_core::{CapacityLedger, NodeRegistry};
use symphony_http::{router, AppState};
use symphony_proto::log_hub::LogHub;
use symphony_proto::session::SessionHandle;

fn test_state() -> (AppState, mpsc::Receiver<()>) {
    let store: symphony_core::store::SharedStore = Arc::new(InMemoryStore::new());
    let registry: symphony_core::SharedRegistry<SessionHandle> = Arc::new(NodeRegistry::new());
    let ledger: symphony_core::SharedLedger = Arc::new(CapacityLedger::new());
    let log_hub = Arc::new(LogHub::new());
    let (wake_tx, wake_rx) = mpsc::channel(16);
    (AppState::new(store, registry, ledger, log_hub, wake_tx), wake_rx)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_then_get_deployment_round_trips() {
    let (state, mut wake_rx) = test_state();
    let app = router(state);

    let create_body = serde_json::json!({
        "name": "d1",
        "kind": "Exec",
        "node_group": "gpu",
        "capacity_requests": {"A": 3},
        "specification": {"command": ["/bin/true"]},
        "desired_state": "Running",
    });
    let request = Request::post("/deployments")
        .header("content-type", "application/json")
        .body(Body::from(create_body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["name"], "d1");
    assert_eq!(created["current_state"], "Pending");
    // Creating a deployment edge-triggers the reconciler.
    assert!(wake_rx.try_recv().is_ok());

    let request = Request::get(format!("/deployments/{id}")).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["id"], id);
    assert_eq!(fetched["node_group"], "gpu");
}

#[tokio::test]
async fn duplicate_name_is_rejected_with_conflict() {
    let (state, _wake_rx) = test_state();
    let app = router(state);

    let body = serde_json::json!({
        "name": "dup",
        "kind": "Exec",
        "node_group": "gpu",
        "capacity_requests": {},
        "specification": {},
        "desired_state": "Running",
    });

    let first = Request::post("/deployments")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(first).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let second = Request::post("/deployments")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(second).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn empty_name_is_rejected_before_any_state_mutation() {
    let (state, _wake_rx) = test_state();
    let app = router(state);

    let body = serde_json::json!({
        "name": "",
        "kind": "Exec",
        "node_group": "gpu",
        "capacity_requests": {},
        "specification": {},
        "desired_state": "Running",
    });
    let request = Request::post("/deployments")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let list = app
        .oneshot(Request::get("/deployments").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let listed = body_json(list).await;
    assert!(listed["deployments"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn patch_toggling_desired_state_wakes_reconciler_and_persists() {
    let (state, mut wake_rx) = test_state();
    let app = router(state);

    let body = serde_json::json!({
        "name": "d1",
        "kind": "Exec",
        "node_group": "gpu",
        "capacity_requests": {},
        "specification": {},
        "desired_state": "Running",
    });
    let created = body_json(
        app.clone()
            .oneshot(
                Request::post("/deployments")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    while wake_rx.try_recv().is_ok() {}

    let patch = serde_json::json!({"desired_state": "Stopped"});
    let response = app
        .clone()
        .oneshot(
            Request::patch(format!("/deployments/{id}"))
                .header("content-type", "application/json")
                .body(Body::from(patch.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let patched = body_json(response).await;
    assert_eq!(patched["desired_state"], "Stopped");
    assert_eq!(patched["spec_revision"], 2);
    assert!(wake_rx.try_recv().is_ok(), "PATCH should edge-trigger the reconciler");
}

#[tokio::test]
async fn get_unknown_deployment_is_not_found() {
    let (state, _wake_rx) = test_state();
    let app = router(state);

    let response = app
        .oneshot(Request::get("/deployments/does-not-exist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_nodes_reports_capacity_vectors() {
    let (state, _wake_rx) = test_state();
    state.ledger.declare_node("n1", symphony_core::model::CapacityVector::from_pairs([("A", 10)])).await;
    let (to_node, _rx) = mpsc::channel(1);
    state
        .registry
        .register(
            symphony_core::model::NodeRecord {
                node_id: "n1".to_string(),
                groups: std::collections::BTreeSet::from(["gpu".to_string()]),
                capacities_total: symphony_core::model::CapacityVector::from_pairs([("A", 10)]),
                heartbeat_interval_ms: 3_000,
                last_heartbeat_ms: 0,
                resources: symphony_core::model::ResourceSnapshot::default(),
            },
            SessionHandle { node_id: "n1".to_string(), to_node },
        )
        .await;

    let app = router(state);
    let response = app
        .oneshot(Request::get("/nodes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    let nodes = listed["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["node_id"], "n1");
    assert_eq!(nodes[0]["available"]["A"], 10);
}
