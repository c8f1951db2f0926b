//! Environment-driven configuration for the node binary, mirroring
//! `symphony-conductor::config::Config`'s `from_env()` shape (ambient
//! config layer; spec.md is silent on how a node is configured, only that
//! it declares `node_id`/`groups`/`capacities_total`/`heartbeat_interval_ms`
//! in its `NodeHello`).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use symphony_core::model::CapacityVector;

/// Node runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// This node's unique identifier, asserted in `NodeHello.node_id`
    /// (spec.md §9 "identity is therefore asserted by `NodeHello.node_id`").
    pub node_id: String,
    /// Placement-affinity labels this node advertises.
    pub groups: BTreeSet<String>,
    /// Declared virtual-capacity totals, per label.
    pub capacities_total: CapacityVector,
    /// How often this node sends a `Heartbeat` (spec.md §4.1, recognized
    /// range 1-30s, default 3s).
    pub heartbeat_interval: Duration,
    /// `https://host:port` (or bare `host:port`) of the conductor's node
    /// `Connect` endpoint.
    pub conductor_addr: String,
    /// Directory holding this node's client mTLS identity plus the CA used
    /// to verify the conductor (spec.md §6 "Persistent state layout").
    pub cert_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// development defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let node_id = std::env::var("SYMPHONY_NODE_ID")
            .unwrap_or_else(|_| format!("node-{}", uuid::Uuid::new_v4()));
        let groups: BTreeSet<String> = std::env::var("SYMPHONY_NODE_GROUPS")
            .unwrap_or_else(|_| "default".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let capacities_total = parse_capacities(
            &std::env::var("SYMPHONY_NODE_CAPACITIES").unwrap_or_else(|_| "cpu=4,memory=4096".to_string()),
        )?;
        let heartbeat_interval_ms: u64 = env_parsed("SYMPHONY_HEARTBEAT_INTERVAL_MS", 3_000);
        let conductor_addr = std::env::var("SYMPHONY_CONDUCTOR_ADDR")
            .unwrap_or_else(|_| "https://127.0.0.1:7443".to_string());
        let cert_dir = PathBuf::from(
            std::env::var("SYMPHONY_CERT_DIR").unwrap_or_else(|_| "./symphony-certs".to_string()),
        );

        Ok(Self {
            node_id,
            groups,
            capacities_total,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            conductor_addr,
            cert_dir,
        })
    }
}

/// Parse `"label=amount,label=amount"` into a [`CapacityVector`]. Used only
/// at node bootstrap; a malformed entry is a startup-fatal configuration
/// error, not something the running node should paper over.
fn parse_capacities(raw: &str) -> anyhow::Result<CapacityVector> {
    let mut pairs = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (label, amount) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("malformed capacity entry {entry:?}, expected label=amount"))?;
        let amount: i64 = amount
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("malformed capacity amount in {entry:?}"))?;
        pairs.push((label.trim().to_string(), amount));
    }
    Ok(CapacityVector::from_pairs(pairs))
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capacities() {
        let vector = parse_capacities("cpu=4, memory=8192").unwrap();
        assert_eq!(vector.get("cpu"), 4);
        assert_eq!(vector.get("memory"), 8192);
    }

    #[test]
    fn rejects_malformed_capacity() {
        assert!(parse_capacities("cpu").is_err());
        assert!(parse_capacities("cpu=not-a-number").is_err());
    }

    #[test]
    fn env_parsed_falls_back_on_unset_var() {
        assert_eq!(env_parsed::<u64>("SYMPHONY_DOES_NOT_EXIST_VAR", 7), 7);
    }
}
