//! Conductor binary entry point: wires the deployment store, node registry,
//! capacity ledger and reconciler together behind the node `Connect` gRPC
//! service, under mTLS.
//!
//! Bootstrap shape (manual multi-thread runtime, `tracing_subscriber` with
//! `EnvFilter::try_from_default_env`, thin `main` delegating to an async
//! `run`) follows the teacher's `crates/services/http-server/src/main.rs`.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tonic::transport::{Server, ServerTlsConfig};
use tracing::{error, info};

use symphony_conductor::config::Config;
use symphony_conductor::service::NodeConductorService;
use symphony_conductor::sink::ConductorSink;
use symphony_conductor::certs;
use symphony_core::store::InMemoryStore;
use symphony_core::{CapacityLedger, NodeRegistry};
use symphony_http::AppState;
use symphony_proto::generated::node_conductor_server::NodeConductorServer;
use symphony_proto::log_hub::LogHub;
use symphony_proto::session::SessionHandle;
use symphony_reconciler::Reconciler;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("symphony-conductor")
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_addr = %config.bind_addr,
        "symphony-conductor starting"
    );

    let bundle = certs::load_or_generate(&config.cert_dir).context("loading certificate bundle")?;
    let tls = ServerTlsConfig::new()
        .identity(bundle.server_identity.clone())
        .client_ca_root(bundle.ca_certificate());

    let store: symphony_core::store::SharedStore = Arc::new(InMemoryStore::new());
    let registry: symphony_core::SharedRegistry<SessionHandle> = Arc::new(NodeRegistry::new());
    let ledger: symphony_core::SharedLedger = Arc::new(CapacityLedger::new());
    let log_hub = Arc::new(LogHub::new());

    let sink = Arc::new(ConductorSink::new(registry.clone(), store.clone()));
    let reconciler = Arc::new(Reconciler::new(store.clone(), registry.clone(), ledger.clone(), sink));

    let (wake_tx, wake_rx) = mpsc::channel(64);
    let reconciler_for_loop = reconciler.clone();
    let sweep_interval = config.sweep_interval;
    let reconciler_task = tokio::spawn(async move {
        reconciler_for_loop.run(wake_rx, sweep_interval).await;
    });

    let service = NodeConductorService::new(
        registry.clone(),
        ledger.clone(),
        store.clone(),
        reconciler.clone(),
        wake_tx.clone(),
        log_hub.clone(),
        config.session_queue_capacity,
    );

    let http_state = AppState::new(store.clone(), registry.clone(), ledger.clone(), log_hub.clone(), wake_tx.clone());
    let http_addr = config.http_bind_addr;
    let (http_shutdown_tx, http_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http_task = tokio::spawn(async move {
        tokio::select! {
            result = symphony_http::serve(http_state, http_addr) => {
                if let Err(err) = result {
                    error!(error = %err, "control HTTP surface error");
                }
            }
            _ = http_shutdown_rx => {}
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = http_shutdown_tx.send(());
        }
    });

    info!(bind_addr = %config.bind_addr, "node session service listening");
    Server::builder()
        .tls_config(tls)?
        .trace_fn(|_| tracing::info_span!("node_session"))
        .add_service(NodeConductorServer::new(service))
        .serve_with_shutdown(config.bind_addr, async {
            shutdown_rx.await.ok();
        })
        .await
        .context("gRPC server error")?;

    drop(wake_tx);
    if let Err(err) = reconciler_task.await {
        error!(error = %err, "reconciler task panicked");
    }
    if let Err(err) = http_task.await {
        error!(error = %err, "control HTTP task panicked");
    }

    info!("symphony-conductor shutdown complete");
    Ok(())
}
