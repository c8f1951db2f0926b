//! Shared application state every handler reads from.

use std::sync::Arc;

use tokio::sync::mpsc;

use symphony_core::store::SharedStore;
use symphony_core::{SharedLedger, SharedRegistry};
use symphony_proto::log_hub::LogHub;
use symphony_proto::session::SessionHandle;

/// Everything a handler needs: the store (desired state, source of truth),
/// the node registry (for `/nodes` and resolving a deployment's assigned
/// node for log streaming), the capacity ledger (for `/nodes` capacity
/// vectors), the log hub, and a sender that edge-triggers the reconciler
/// (`spec.md` §4.6 "event notification").
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub registry: SharedRegistry<SessionHandle>,
    pub ledger: SharedLedger,
    pub log_hub: Arc<LogHub>,
    pub wake: mpsc::Sender<()>,
}

impl AppState {
    pub fn new(
        store: SharedStore,
        registry: SharedRegistry<SessionHandle>,
        ledger: SharedLedger,
        log_hub: Arc<LogHub>,
        wake: mpsc::Sender<()>,
    ) -> Self {
        Self { store, registry, ledger, log_hub, wake }
    }

    /// Notify the reconciler something changed, without waiting for the
    /// next periodic sweep.
    pub async fn wake_reconciler(&self) {
        let _ = self.wake.send(()).await;
    }
}
