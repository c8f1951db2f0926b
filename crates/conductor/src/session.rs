//! Per-node session actor: the `NodeHello` handshake followed by a
//! heartbeat/status/log processing loop, grounded on the teacher's
//! `handle_stream` pattern in `transports/grpc/src/streaming.rs` (read one
//! frame at a time off `Streaming<NodeToConductor>`, write replies onto the
//! paired `mpsc::Sender<ConductorToNode>`).
//!
//! The reader loop never applies back-pressure to the gRPC transport layer
//! itself; instead it decouples transport reads from state-update
//! processing with its own bounded queue (`spec.md` §5), so a slow
//! reconciler tick never stalls `tonic`'s read side. A queue that fills up
//! is treated as a slow, uncooperative node and the session is torn down.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tonic::{Status, Streaming};
use tracing::{info, warn};

use symphony_core::model::{Connectivity, NodeRecord, ResourceSnapshot};
use symphony_core::store::SharedStore;
use symphony_core::{RegisterOutcome, SharedLedger, SharedRegistry};
use symphony_proto::generated::{conductor_to_node, node_to_conductor, ConductorToNode, NodeToConductor, Pong};
use symphony_proto::log_hub::LogHub;
pub use symphony_proto::session::SessionHandle;
use symphony_proto::{decode_capacity, decode_current_state, decode_log_entry, decode_resources};
use symphony_reconciler::Reconciler;

/// Bounded inbound frame queue per session (`spec.md` §5).
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Shared dependencies every session needs; cheap to clone, one instance per
/// accepted stream.
#[derive(Clone)]
pub struct Session {
    registry: SharedRegistry<SessionHandle>,
    ledger: SharedLedger,
    store: SharedStore,
    reconciler: Arc<Reconciler<SessionHandle>>,
    wake: mpsc::Sender<()>,
    log_hub: Arc<LogHub>,
}

impl Session {
    pub fn new(
        registry: SharedRegistry<SessionHandle>,
        ledger: SharedLedger,
        store: SharedStore,
        reconciler: Arc<Reconciler<SessionHandle>>,
        wake: mpsc::Sender<()>,
        log_hub: Arc<LogHub>,
    ) -> Self {
        Self { registry, ledger, store, reconciler, wake, log_hub }
    }

    /// Drive one node's session end to end: handshake, then process frames
    /// until the stream ends or the node is dropped for misbehaving.
    pub async fn run(self, mut inbound: Streaming<NodeToConductor>, outbound: mpsc::Sender<Result<ConductorToNode, Status>>) {
        let Some(node_id) = self.await_hello(&mut inbound, &outbound).await else {
            return;
        };

        let (frame_tx, mut frame_rx) = mpsc::channel::<NodeToConductor>(INBOUND_QUEUE_CAPACITY);
        let reader_node_id = node_id.clone();
        let reader = tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(frame)) => {
                        if frame_tx.try_send(frame).is_err() {
                            warn!(node_id = %reader_node_id, "inbound queue full, closing session as a slow consumer");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(node_id = %reader_node_id, error = %err, "session stream error");
                        break;
                    }
                }
            }
        });

        while let Some(frame) = frame_rx.recv().await {
            self.handle_frame(&node_id, frame, &outbound).await;
        }

        reader.abort();
        self.registry.deregister(&node_id).await;
        self.ledger.forget_node(&node_id).await;
        let _ = self.wake.send(()).await;
        info!(node_id = %node_id, "session closed");
    }

    /// Consume the first frame, which must be a `NodeHello`, and register
    /// the node. Returns `None` (after rejecting the stream) on any
    /// handshake failure, per §4.1.
    async fn await_hello(
        &self,
        inbound: &mut Streaming<NodeToConductor>,
        outbound: &mpsc::Sender<Result<ConductorToNode, Status>>,
    ) -> Option<String> {
        let frame = match inbound.message().await {
            Ok(Some(frame)) => frame,
            _ => return None,
        };

        let Some(node_to_conductor::Frame::Hello(hello)) = frame.frame else {
            let _ = outbound.send(Err(Status::failed_precondition("first frame must be NodeHello"))).await;
            return None;
        };

        if hello.node_id.is_empty() || !NodeRecord::heartbeat_interval_in_range(hello.heartbeat_interval_ms) {
            let _ = outbound.send(Err(Status::invalid_argument("invalid NodeHello"))).await;
            return None;
        }

        let capacities_total = decode_capacity(&hello.capacities_total);
        if !capacities_total.all_positive() {
            let _ = outbound.send(Err(Status::invalid_argument("declared capacities must be positive"))).await;
            return None;
        }

        let node_id = hello.node_id.clone();
        let record = NodeRecord {
            node_id: node_id.clone(),
            groups: hello.groups.into_iter().collect(),
            capacities_total: capacities_total.clone(),
            heartbeat_interval_ms: hello.heartbeat_interval_ms,
            last_heartbeat_ms: now_ms(),
            resources: hello.static_resources.map(|r| decode_resources(&r)).unwrap_or_default(),
        };

        let handle = SessionHandle { node_id: node_id.clone(), to_node: outbound.clone() };
        if self.registry.register(record, handle).await == RegisterOutcome::Conflict {
            let _ = outbound.send(Err(Status::already_exists("node_id already connected"))).await;
            return None;
        }

        self.ledger.declare_node(node_id.clone(), capacities_total).await;
        let _ = self.wake.send(()).await;
        info!(node_id = %node_id, "node connected");
        Some(node_id)
    }

    async fn handle_frame(&self, node_id: &str, frame: NodeToConductor, outbound: &mpsc::Sender<Result<ConductorToNode, Status>>) {
        match frame.frame {
            Some(node_to_conductor::Frame::Heartbeat(hb)) => {
                self.touch(node_id, hb.resources.map(|r| decode_resources(&r))).await;
                for status in &hb.deployments {
                    self.apply_status(status).await;
                }
                let pong = ConductorToNode { frame: Some(conductor_to_node::Frame::Pong(Pong { server_time_unix_ms: now_ms() })) };
                let _ = outbound.send(Ok(pong)).await;
            }
            Some(node_to_conductor::Frame::StatusList(list)) => {
                for status in &list.deployments {
                    self.apply_status(status).await;
                }
                let _ = self.wake.send(()).await;
            }
            Some(node_to_conductor::Frame::LogBatch(batch)) => {
                let entries = batch.entries.iter().map(decode_log_entry).collect();
                self.log_hub.ingest(&batch.deployment_id, entries).await;
            }
            Some(node_to_conductor::Frame::Hello(_)) => {
                warn!(node_id, "duplicate NodeHello on an established session, ignoring");
            }
            None => {}
        }
    }

    async fn touch(&self, node_id: &str, resources: Option<ResourceSnapshot>) {
        if let Some(mut record) = self.registry.get(node_id).await {
            record.last_heartbeat_ms = now_ms();
            if let Some(resources) = resources {
                record.resources = resources;
            }
            self.registry.update_record(node_id, record).await;
        }
    }

    async fn apply_status(&self, status: &symphony_proto::generated::DeploymentStatus) {
        let wire_state = symphony_proto::generated::DeploymentCurrentState::try_from(status.current_state)
            .unwrap_or(symphony_proto::generated::DeploymentCurrentState::Unspecified);
        let current_state = decode_current_state(wire_state);
        let now = now_ms();
        self.store.report_state(&status.deployment_id, current_state, status.exit_code, now).await;
        self.reconciler.ack_revision(&status.deployment_id, status.revision_acked).await;
    }
}

/// Whether a node record's heartbeat timing currently reads as live. Exposed
/// for `symphony-http`'s node listing endpoint, which reports connectivity
/// alongside the raw record.
pub fn is_reachable(record: &NodeRecord, now_ms: i64) -> bool {
    record.connectivity(now_ms) != Connectivity::Disconnected
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
