//! Node-side half of the mTLS identity loaded from `cert_dir`
//! (`spec.md` §6 "Persistent state layout"), mirroring
//! `symphony_conductor::certs` but reading the node client cert/key instead
//! of generating the bundle: a node is not the bundle's owner, only a
//! consumer of files the conductor process (or an out-of-scope bootstrap
//! step) has already placed on its filesystem.

use std::path::Path;

use tonic::transport::{Certificate, ClientTlsConfig, Identity};

/// Load this node's client identity plus the CA root used to verify the
/// conductor's server certificate.
pub fn load_client_tls(dir: &Path) -> anyhow::Result<ClientTlsConfig> {
    let ca_cert_path = dir.join("ca.pem");
    let node_cert_path = dir.join("node-client.pem");
    let node_key_path = dir.join("node-client-key.pem");

    for path in [&ca_cert_path, &node_cert_path, &node_key_path] {
        if !path.exists() {
            anyhow::bail!(
                "missing certificate file {} — start the conductor first so it can generate \
                 the development bundle, then copy it to this node's cert_dir",
                path.display()
            );
        }
    }

    let ca_pem = std::fs::read(&ca_cert_path)?;
    let node_cert_pem = std::fs::read(&node_cert_path)?;
    let node_key_pem = std::fs::read(&node_key_path)?;

    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca_pem))
        .identity(Identity::from_pem(node_cert_pem, node_key_pem))
        .domain_name("symphony-conductor"))
}
