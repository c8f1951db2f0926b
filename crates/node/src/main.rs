//! Node binary entry point: wires the supervisor, node-local log hub and
//! the conductor session together, matching `symphony-conductor::main`'s
//! bootstrap shape (manual multi-thread runtime, `tracing_subscriber` with
//! `EnvFilter::try_from_default_env`, thin `main` delegating to an async
//! `run`).

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use symphony_node::config::Config;
use symphony_node::log_hub::NodeLogHub;
use symphony_node::session::NodeSession;
use symphony_node::supervisor::Supervisor;

/// Status-report channel depth between the supervisor's actors and the
/// session's heartbeat/push loop.
const STATUS_QUEUE_CAPACITY: usize = 256;

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
        .thread_name("symphony-node")
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = %config.node_id,
        conductor_addr = %config.conductor_addr,
        "symphony-node starting"
    );

    let log_hub = Arc::new(NodeLogHub::new());
    let (status_tx, status_rx) = mpsc::channel(STATUS_QUEUE_CAPACITY);
    let supervisor = Arc::new(Supervisor::new(log_hub.clone(), status_tx));

    let session = Arc::new(NodeSession::new(config, supervisor, log_hub));

    tokio::select! {
        _ = session.run(status_rx) => unreachable!("NodeSession::run never returns"),
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    info!("symphony-node shutdown complete");
    Ok(())
}
