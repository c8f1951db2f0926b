//! The node's persistent gRPC client session to the conductor: handshake,
//! heartbeat loop, inbound command dispatch to the [`Supervisor`], and
//! outbound log fan-out for active `LogSubscribe`s.
//!
//! Grounded on the teacher's client-side stream driver in
//! `transports/grpc/src/client.rs` (split reader/writer tasks around one
//! `mpsc` outbound queue, reconnect-with-backoff wrapping the whole thing),
//! adapted to `spec.md` §4.1's node-owns-reconnection rule: "reconnection is
//! the node's responsibility (fresh `NodeHello`, new session)."

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tonic::transport::Endpoint;
use tonic::Request;
use tracing::{info, warn};

use symphony_proto::generated::node_conductor_client::NodeConductorClient;
use symphony_proto::generated::{
    conductor_to_node, node_to_conductor, ConductorToNode, DeploymentCommandKind, DeploymentStatus,
    DeploymentStatusList, Heartbeat, LogBatch, LogLine, NodeHello, NodeToConductor,
};
use symphony_proto::{encode_capacity, encode_current_state, encode_log_stream, encode_resources};

use crate::certs::load_client_tls;
use crate::config::Config;
use crate::log_hub::NodeLogHub;
use crate::resources::ResourceCollector;
use crate::supervisor::{ActorCommand, DeploymentStatusReport, Supervisor};

/// Outbound frame queue depth, mirroring the conductor's inbound queue
/// sizing rationale (`spec.md` §5 "no unbounded in-memory buffering").
const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Reconnect backoff after a transport error, fixed rather than
/// exponential: spec.md doesn't specify reconnect pacing, and a node that
/// lost its conductor is expected back quickly in the common case (a
/// conductor restart), not a prolonged outage.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Drives one node's half of the persistent stream for the lifetime of the
/// process, reconnecting on every transport failure.
pub struct NodeSession {
    config: Config,
    supervisor: Arc<Supervisor>,
    log_hub: Arc<NodeLogHub>,
    resources: Mutex<ResourceCollector>,
    statuses: Mutex<HashMap<String, DeploymentStatusReport>>,
}

impl NodeSession {
    pub fn new(config: Config, supervisor: Arc<Supervisor>, log_hub: Arc<NodeLogHub>) -> Self {
        Self {
            config,
            supervisor,
            log_hub,
            resources: Mutex::new(ResourceCollector::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Run forever: connect, handshake, process frames until the stream
    /// ends or errors, then reconnect after [`RECONNECT_DELAY`].
    pub async fn run(self: Arc<Self>, status_rx: mpsc::Receiver<DeploymentStatusReport>) -> ! {
        let status_rx = Arc::new(Mutex::new(status_rx));
        loop {
            match self.clone().run_once(status_rx.clone()).await {
                Ok(()) => info!(node_id = %self.config.node_id, "session ended cleanly, reconnecting"),
                Err(err) => warn!(node_id = %self.config.node_id, error = %err, "session failed, reconnecting"),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn run_once(self: Arc<Self>, status_rx: Arc<Mutex<mpsc::Receiver<DeploymentStatusReport>>>) -> anyhow::Result<()> {
        let tls = load_client_tls(&self.config.cert_dir)?;
        let channel = Endpoint::from_shared(self.config.conductor_addr.clone())?
            .tls_config(tls)?
            .connect()
            .await?;
        let mut client = NodeConductorClient::new(channel);

        let (to_conductor, outbound_rx) = mpsc::channel::<NodeToConductor>(OUTBOUND_QUEUE_CAPACITY);
        self.send_hello(&to_conductor).await;

        let outbound_stream = tokio_stream::wrappers::ReceiverStream::new(outbound_rx);
        let response = client.connect(Request::new(outbound_stream)).await?;
        let mut inbound = response.into_inner();

        let heartbeat_task = {
            let this = self.clone();
            let to_conductor = to_conductor.clone();
            tokio::spawn(async move { this.heartbeat_loop(to_conductor).await })
        };
        let status_task = {
            let this = self.clone();
            let to_conductor = to_conductor.clone();
            tokio::spawn(async move { this.status_push_loop(status_rx, to_conductor).await })
        };

        let result = loop {
            match inbound.message().await {
                Ok(Some(frame)) => self.handle_frame(frame, &to_conductor).await,
                Ok(None) => break Ok(()),
                Err(err) => break Err(anyhow::anyhow!(err)),
            }
        };

        heartbeat_task.abort();
        status_task.abort();
        result
    }

    async fn send_hello(&self, to_conductor: &mpsc::Sender<NodeToConductor>) {
        let resources = self.resources.lock().await.collect();
        let hello = NodeHello {
            node_id: self.config.node_id.clone(),
            groups: self.config.groups.iter().cloned().collect(),
            capacities_total: encode_capacity(&self.config.capacities_total),
            static_resources: Some(encode_resources(&resources)),
            heartbeat_interval_ms: self.config.heartbeat_interval.as_millis() as u64,
        };
        let frame = NodeToConductor { frame: Some(node_to_conductor::Frame::Hello(hello)) };
        let _ = to_conductor.send(frame).await;
    }

    async fn heartbeat_loop(&self, to_conductor: mpsc::Sender<NodeToConductor>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            ticker.tick().await;
            let resources = self.resources.lock().await.collect();
            let deployments = self.statuses.lock().await.values().cloned().map(to_wire_status).collect();
            let heartbeat = Heartbeat { resources: Some(encode_resources(&resources)), deployments };
            let frame = NodeToConductor { frame: Some(node_to_conductor::Frame::Heartbeat(heartbeat)) };
            if to_conductor.send(frame).await.is_err() {
                return;
            }
        }
    }

    /// Forward every status change the supervisor pushes immediately
    /// (`spec.md` §4.7 "State changes between heartbeats are also pushed
    /// immediately to minimize latency"), and keep the running snapshot
    /// the heartbeat loop reads from up to date.
    async fn status_push_loop(&self, status_rx: Arc<Mutex<mpsc::Receiver<DeploymentStatusReport>>>, to_conductor: mpsc::Sender<NodeToConductor>) {
        let mut status_rx = status_rx.lock().await;
        while let Some(report) = status_rx.recv().await {
            self.statuses.lock().await.insert(report.deployment_id.clone(), report.clone());
            let list = DeploymentStatusList { deployments: vec![to_wire_status(report)] };
            let frame = NodeToConductor { frame: Some(node_to_conductor::Frame::StatusList(list)) };
            if to_conductor.send(frame).await.is_err() {
                return;
            }
        }
    }

    async fn handle_frame(&self, frame: ConductorToNode, to_conductor: &mpsc::Sender<NodeToConductor>) {
        match frame.frame {
            Some(conductor_to_node::Frame::DeploymentReq(req)) => {
                let command = match DeploymentCommandKind::try_from(req.kind) {
                    Ok(DeploymentCommandKind::Start) | Ok(DeploymentCommandKind::Update) => ActorCommand::Apply {
                        spec_revision: req.spec_revision,
                        deployment_kind: req.deployment_kind,
                        specification_json: req.specification_json,
                    },
                    Ok(DeploymentCommandKind::Stop) => ActorCommand::Stop { spec_revision: req.spec_revision },
                    _ => {
                        warn!(deployment_id = %req.deployment_id, "ignoring DeploymentReq with unspecified kind");
                        return;
                    }
                };
                self.supervisor.dispatch(&req.deployment_id, command).await;
            }
            Some(conductor_to_node::Frame::DeploymentCancel(cancel)) => {
                self.supervisor.dispatch(&cancel.deployment_id, ActorCommand::Cancel).await;
                self.statuses.lock().await.remove(&cancel.deployment_id);
            }
            Some(conductor_to_node::Frame::Pong(_)) => {}
            Some(conductor_to_node::Frame::LogSubscribe(sub)) => {
                self.spawn_log_forwarder(sub.deployment_id, sub.tail as usize, to_conductor.clone());
            }
            Some(conductor_to_node::Frame::LogUnsubscribe(_)) => {
                // Forwarder tasks exit on their own once the subscriber-side
                // broadcast receiver is dropped by the conductor's log hub;
                // there is nothing node-local left to cancel explicitly.
            }
            None => {}
        }
    }

    fn spawn_log_forwarder(&self, deployment_id: String, tail: usize, to_conductor: mpsc::Sender<NodeToConductor>) {
        let log_hub = self.log_hub.clone();
        tokio::spawn(async move {
            let (backfill, mut rx) = log_hub.subscribe(&deployment_id, tail).await;
            if !backfill.is_empty() {
                let batch = LogBatch { deployment_id: deployment_id.clone(), entries: backfill.iter().map(to_wire_log_line).collect() };
                let frame = NodeToConductor { frame: Some(node_to_conductor::Frame::LogBatch(batch)) };
                if to_conductor.send(frame).await.is_err() {
                    return;
                }
            }
            loop {
                match rx.recv().await {
                    Ok(entry) => {
                        let batch = LogBatch { deployment_id: deployment_id.clone(), entries: vec![to_wire_log_line(&entry)] };
                        let frame = NodeToConductor { frame: Some(node_to_conductor::Frame::LogBatch(batch)) };
                        if to_conductor.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        warn!(deployment_id, "log forwarder lagged behind the ring, dropping subscriber as slow-consumer");
                        return;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }
}

fn to_wire_status(report: DeploymentStatusReport) -> DeploymentStatus {
    DeploymentStatus {
        deployment_id: report.deployment_id,
        current_state: encode_current_state(report.current_state) as i32,
        exit_code: report.exit_code,
        revision_acked: report.revision_acked,
    }
}

fn to_wire_log_line(entry: &symphony_core::model::LogEntry) -> LogLine {
    LogLine {
        timestamp_unix_ms: entry.timestamp_unix_ms,
        stream: encode_log_stream(entry.stream) as i32,
        line: entry.line.clone(),
    }
}
