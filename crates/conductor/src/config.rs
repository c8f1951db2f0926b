//! Environment-driven configuration for the conductor binary: no config
//! file or CLI flag parser, matching the teacher's `HTTP_BIND_ADDRESS`-style
//! env-var bootstrap (ambient config layer per `spec.md` §2's silence on the
//! subject).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Conductor runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the node `Connect` gRPC service binds to.
    pub bind_addr: SocketAddr,
    /// Address the control HTTP boundary binds to.
    pub http_bind_addr: SocketAddr,
    /// Directory holding (or receiving generated) mTLS certificate material.
    pub cert_dir: PathBuf,
    /// Periodic reconciler sweep interval.
    pub sweep_interval: Duration,
    /// Per-session inbound frame queue capacity (`spec.md` §5).
    pub session_queue_capacity: usize,
    /// Per-deployment log subscriber broadcast channel capacity (`spec.md` §5).
    pub log_subscriber_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// development defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = std::env::var("SYMPHONY_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:7443".to_string())
            .parse()?;
        let http_bind_addr = std::env::var("SYMPHONY_HTTP_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:7080".to_string())
            .parse()?;
        let cert_dir = PathBuf::from(
            std::env::var("SYMPHONY_CERT_DIR").unwrap_or_else(|_| "./symphony-certs".to_string()),
        );
        let sweep_interval_ms: u64 = env_parsed(
            "SYMPHONY_SWEEP_INTERVAL_MS",
            symphony_reconciler::DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
        );
        let session_queue_capacity =
            env_parsed("SYMPHONY_SESSION_QUEUE_CAPACITY", crate::session::INBOUND_QUEUE_CAPACITY);
        let log_subscriber_capacity = env_parsed(
            "SYMPHONY_LOG_SUBSCRIBER_CAPACITY",
            crate::log_hub::SUBSCRIBER_CHANNEL_CAPACITY,
        );

        Ok(Self {
            bind_addr,
            http_bind_addr,
            cert_dir,
            sweep_interval: Duration::from_millis(sweep_interval_ms),
            session_queue_capacity,
            log_subscriber_capacity,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
