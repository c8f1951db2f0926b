//! The `NodeConductor::Connect` RPC: accepts one bidirectional stream per
//! node and spawns a [`Session`] actor to drive it, grounded on the
//! teacher's `stream_pipeline` handler in `transports/grpc/src/streaming.rs`
//! (`let (tx, rx) = mpsc::channel(..); tokio::spawn(handle_stream(..));
//! Ok(Response::new(ReceiverStream::new(rx)))`).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use symphony_core::store::SharedStore;
use symphony_core::{SharedLedger, SharedRegistry};
use symphony_proto::generated::node_conductor_server::NodeConductor;
use symphony_proto::generated::{ConductorToNode, NodeToConductor};
use symphony_reconciler::Reconciler;

use crate::log_hub::LogHub;
use crate::session::{Session, SessionHandle};

/// Tonic service implementation wiring accepted streams to [`Session`]
/// actors.
pub struct NodeConductorService {
    registry: SharedRegistry<SessionHandle>,
    ledger: SharedLedger,
    store: SharedStore,
    reconciler: Arc<Reconciler<SessionHandle>>,
    wake: mpsc::Sender<()>,
    log_hub: Arc<LogHub>,
    session_queue_capacity: usize,
}

impl NodeConductorService {
    pub fn new(
        registry: SharedRegistry<SessionHandle>,
        ledger: SharedLedger,
        store: SharedStore,
        reconciler: Arc<Reconciler<SessionHandle>>,
        wake: mpsc::Sender<()>,
        log_hub: Arc<LogHub>,
        session_queue_capacity: usize,
    ) -> Self {
        Self { registry, ledger, store, reconciler, wake, log_hub, session_queue_capacity }
    }
}

#[tonic::async_trait]
impl NodeConductor for NodeConductorService {
    type ConnectStream = ReceiverStream<Result<ConductorToNode, Status>>;

    async fn connect(
        &self,
        request: Request<Streaming<NodeToConductor>>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        let inbound = request.into_inner();
        let (outbound, rx) = mpsc::channel(self.session_queue_capacity);

        let session = Session::new(
            self.registry.clone(),
            self.ledger.clone(),
            self.store.clone(),
            self.reconciler.clone(),
            self.wake.clone(),
            self.log_hub.clone(),
        );
        tokio::spawn(async move {
            session.run(inbound, outbound).await;
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
