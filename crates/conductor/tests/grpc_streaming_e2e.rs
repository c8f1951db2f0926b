//! End-to-end test for the node <-> conductor gRPC stream.
//!
//! Drives the real `NodeConductorService` over a real `tonic` transport
//! (loopback TCP, no TLS — mTLS bootstrap is exercised separately in
//! `certs`, this test is about the session/reconciler wiring), standing in
//! a raw client for the node side rather than pulling in `symphony-node`.
//! Grounded on the teacher's `grpc_streaming_e2e.rs`: start server, connect
//! client, drive one request/response cycle, assert on the observed state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tonic::transport::Server;
use tonic::Request;

use symphony_conductor::service::NodeConductorService;
use symphony_conductor::session::SessionHandle;
use symphony_conductor::sink::ConductorSink;
use symphony_core::model::{CapacityVector, DeploymentKind, DesiredState};
use symphony_core::store::{InMemoryStore, NewDeployment};
use symphony_core::{CapacityLedger, NodeRegistry};
use symphony_proto::generated::node_conductor_client::NodeConductorClient;
use symphony_proto::generated::node_conductor_server::NodeConductorServer;
use symphony_proto::generated::{
    conductor_to_node, node_to_conductor, CapacityEntry, ConductorToNode, DeploymentCommandKind,
    DeploymentStatus, DeploymentStatusList, Heartbeat, NodeHello, NodeToConductor,
};
use symphony_proto::log_hub::LogHub;
use symphony_reconciler::Reconciler;

async fn start_test_server() -> (
    String,
    Arc<InMemoryStore>,
    tokio::task::JoinHandle<()>,
    mpsc::Sender<()>,
) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let local_addr = listener.local_addr().unwrap();
    let server_url = format!("http://{local_addr}");

    let store: symphony_core::store::SharedStore = Arc::new(InMemoryStore::new());
    let registry: symphony_core::SharedRegistry<SessionHandle> = Arc::new(NodeRegistry::new());
    let ledger: symphony_core::SharedLedger = Arc::new(CapacityLedger::new());
    let log_hub = Arc::new(LogHub::new());

    let sink = Arc::new(ConductorSink::new(registry.clone(), store.clone()));
    let reconciler = Arc::new(Reconciler::new(store.clone(), registry.clone(), ledger.clone(), sink));

    let (wake_tx, wake_rx) = mpsc::channel(64);
    let reconciler_for_loop = reconciler.clone();
    tokio::spawn(async move {
        reconciler_for_loop.run(wake_rx, Duration::from_millis(200)).await;
    });

    let service = NodeConductorService::new(registry, ledger, store.clone(), reconciler, wake_tx.clone(), log_hub, 256);

    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(NodeConductorServer::new(service))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (server_url, store, handle, wake_tx)
}

#[tokio::test]
async fn node_hello_then_placement_drives_start_command() {
    let (server_url, store, _server_handle, wake_tx) = start_test_server().await;

    let mut client = timeout(Duration::from_secs(5), NodeConductorClient::connect(server_url))
        .await
        .expect("timeout connecting")
        .expect("failed to connect");

    let (to_conductor, outbound_rx) = mpsc::channel::<NodeToConductor>(16);
    let hello = NodeHello {
        node_id: "n1".to_string(),
        groups: vec!["gpu".to_string()],
        capacities_total: vec![CapacityEntry { label: "A".to_string(), amount: 10 }],
        static_resources: None,
        heartbeat_interval_ms: 3_000,
    };
    to_conductor
        .send(NodeToConductor { frame: Some(node_to_conductor::Frame::Hello(hello)) })
        .await
        .unwrap();

    let outbound_stream = tokio_stream::wrappers::ReceiverStream::new(outbound_rx);
    let response = client.connect(Request::new(outbound_stream)).await.expect("connect RPC failed");
    let mut inbound = response.into_inner();

    // Create a deployment targeting the node's group directly through the
    // store, the way the HTTP boundary would, then edge-trigger the
    // reconciler rather than waiting on its periodic sweep.
    let symphony_core::store::CreateOutcome::Created(d1) = store
        .create(
            NewDeployment {
                name: "d1".into(),
                kind: DeploymentKind::Exec,
                node_group: "gpu".into(),
                capacity_requests: CapacityVector::from_pairs([("A", 3)]),
                specification: serde_json::json!({"command": ["/bin/true"]}),
                desired_state: DesiredState::Running,
            },
            0,
        )
        .await
    else {
        panic!("expected deployment to be created")
    };
    wake_tx.send(()).await.unwrap();

    // The conductor should push a Start DeploymentReq down this node's
    // stream once the reconciler places d1 on n1.
    let frame = timeout(Duration::from_secs(5), inbound.message())
        .await
        .expect("timeout waiting for DeploymentReq")
        .expect("stream error")
        .expect("stream ended early");

    let Some(conductor_to_node::Frame::DeploymentReq(req)) = frame.frame else {
        panic!("expected a DeploymentReq frame, got {frame:?}");
    };
    assert_eq!(req.deployment_id, d1.id);
    assert_eq!(req.kind, DeploymentCommandKind::Start as i32);
    assert_eq!(req.spec_revision, 1);

    // Ack it via a Heartbeat carrying the deployment's reported state, as
    // the real node-side supervisor would once the child is running.
    let heartbeat = Heartbeat {
        resources: None,
        deployments: vec![DeploymentStatus {
            deployment_id: d1.id.clone(),
            current_state: symphony_proto::generated::DeploymentCurrentState::Running as i32,
            exit_code: None,
            revision_acked: req.spec_revision,
        }],
    };
    to_conductor
        .send(NodeToConductor { frame: Some(node_to_conductor::Frame::Heartbeat(heartbeat)) })
        .await
        .unwrap();

    // Wait for the Pong reply that always accompanies a processed Heartbeat.
    let pong_frame = timeout(Duration::from_secs(5), inbound.message())
        .await
        .expect("timeout waiting for Pong")
        .expect("stream error")
        .expect("stream ended early");
    assert!(matches!(pong_frame.frame, Some(conductor_to_node::Frame::Pong(_))));

    // Give the session's async handler a moment to land the store write.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let reported = store.get(&d1.id).await.unwrap();
    assert_eq!(reported.current_state, symphony_core::model::CurrentState::Running);
    assert_eq!(reported.assigned_node_id.as_deref(), Some("n1"));
}

#[tokio::test]
async fn duplicate_node_hello_is_rejected() {
    let (server_url, _store, _server_handle, _wake_tx) = start_test_server().await;

    let mut client1 = NodeConductorClient::connect(server_url.clone()).await.unwrap();
    let (tx1, rx1) = mpsc::channel::<NodeToConductor>(4);
    tx1.send(NodeToConductor {
        frame: Some(node_to_conductor::Frame::Hello(NodeHello {
            node_id: "dup".to_string(),
            groups: vec!["cpu".to_string()],
            capacities_total: vec![CapacityEntry { label: "A".to_string(), amount: 4 }],
            static_resources: None,
            heartbeat_interval_ms: 3_000,
        })),
    })
    .await
    .unwrap();
    let mut inbound1 = client1
        .connect(Request::new(tokio_stream::wrappers::ReceiverStream::new(rx1)))
        .await
        .unwrap()
        .into_inner();
    // Drive the first frame so the registration completes before the
    // second node races it.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut client2 = NodeConductorClient::connect(server_url).await.unwrap();
    let (tx2, rx2) = mpsc::channel::<NodeToConductor>(4);
    tx2.send(NodeToConductor {
        frame: Some(node_to_conductor::Frame::Hello(NodeHello {
            node_id: "dup".to_string(),
            groups: vec!["cpu".to_string()],
            capacities_total: vec![CapacityEntry { label: "A".to_string(), amount: 4 }],
            static_resources: None,
            heartbeat_interval_ms: 3_000,
        })),
    })
    .await
    .unwrap();
    let mut inbound2 = client2
        .connect(Request::new(tokio_stream::wrappers::ReceiverStream::new(rx2)))
        .await
        .unwrap()
        .into_inner();

    let result = timeout(Duration::from_secs(5), inbound2.message()).await.expect("timeout");
    assert!(result.is_err(), "expected the conductor to reject the duplicate NodeHello with a status error");

    // The original session is unaffected.
    drop(inbound1);
    drop(tx1);
}
