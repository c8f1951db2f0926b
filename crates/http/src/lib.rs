//! Control HTTP boundary (`spec.md` §6 "Control HTTP").
//!
//! This is deliberately the thinnest possible implementation of the routes
//! named in the spec: enough to prove the seam compiles and to let the
//! deployment store/registry/reconciler be exercised by something other
//! than a unit test, per `SPEC_FULL.md` §6. TLS, auth, pagination edge
//! cases and the streaming endpoints' backpressure policy are explicitly
//! left to the real external HTTP layer this module stands in for.
//!
//! Grounded on the teacher's `transports/http` axum wiring (`Router::new()`
//! with a shared `Arc<AppState>` extension, `tower_http::trace::TraceLayer`,
//! one handler module per resource).

pub mod dto;
pub mod routes;
pub mod state;

pub use state::AppState;

use std::net::SocketAddr;

use tower_http::trace::TraceLayer;

/// Build the full router over `state`.
pub fn router(state: AppState) -> axum::Router {
    routes::router().with_state(state).layer(TraceLayer::new_for_http())
}

/// Bind and serve the control HTTP surface until the process is asked to
/// shut down. Thin wrapper so `symphony-conductor::main` doesn't need a
/// direct `axum`/`hyper` dependency of its own.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control HTTP surface listening");
    axum::serve(listener, app).await?;
    Ok(())
}
