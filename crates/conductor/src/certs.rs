//! Certificate bundle loading for the mutually-authenticated node stream
//! (`spec.md` §6 "Persistent state layout" / §9 "missing files are generated
//! at first boot").
//!
//! TLS certificate *bootstrap* proper (real CA issuance, rotation, secret
//! storage) is out of scope per `spec.md` §1. What's modeled here is the
//! loader seam: a `CertBundle` the gRPC server needs to start, with a
//! self-signed development implementation that generates a CA and server
//! identity the first time any of the expected files are missing, grounded
//! on the pack's `rcgen::generate_simple_self_signed` usage
//! (`spark-tck::generate_server_config`).

use std::path::{Path, PathBuf};

use tonic::transport::{Certificate, Identity};

/// The PEM material the gRPC server needs to present itself and verify
/// connecting nodes.
pub struct CertBundle {
    /// CA certificate PEM, used to verify incoming node client certs.
    pub ca_pem: Vec<u8>,
    /// Server certificate + private key, presented to connecting nodes.
    pub server_identity: Identity,
}

impl CertBundle {
    /// Trust root as a `tonic` [`Certificate`].
    pub fn ca_certificate(&self) -> Certificate {
        Certificate::from_pem(&self.ca_pem)
    }
}

/// Load (generating if absent) a development certificate bundle under
/// `dir`, containing at least `ca.pem`, a server cert/key, and a node
/// client cert/key — the files named in `spec.md` §6.
///
/// This is a self-signed, single-CA bundle suitable for the "shared node
/// client certificate" model `spec.md` §9 describes as the current,
/// accepted limitation (node identity is asserted by `NodeHello.node_id`,
/// not by certificate subject binding).
pub fn load_or_generate(dir: &Path) -> anyhow::Result<CertBundle> {
    std::fs::create_dir_all(dir)?;

    let ca_cert_path = dir.join("ca.pem");
    let ca_key_path = dir.join("ca-key.pem");
    let server_cert_path = dir.join("server.pem");
    let server_key_path = dir.join("server-key.pem");
    let node_cert_path = dir.join("node-client.pem");
    let node_key_path = dir.join("node-client-key.pem");

    if !all_exist(&[
        &ca_cert_path,
        &ca_key_path,
        &server_cert_path,
        &server_key_path,
        &node_cert_path,
        &node_key_path,
    ]) {
        tracing::warn!(
            dir = %dir.display(),
            "certificate bundle missing or incomplete, generating a self-signed development bundle"
        );
        generate_bundle(
            &ca_cert_path,
            &ca_key_path,
            &server_cert_path,
            &server_key_path,
            &node_cert_path,
            &node_key_path,
        )?;
    }

    let ca_pem = std::fs::read(&ca_cert_path)?;
    let server_cert_pem = std::fs::read(&server_cert_path)?;
    let server_key_pem = std::fs::read(&server_key_path)?;

    Ok(CertBundle {
        ca_pem,
        server_identity: Identity::from_pem(server_cert_pem, server_key_pem),
    })
}

fn all_exist(paths: &[&PathBuf]) -> bool {
    paths.iter().all(|p| p.exists())
}

fn generate_bundle(
    ca_cert_path: &Path,
    ca_key_path: &Path,
    server_cert_path: &Path,
    server_key_path: &Path,
    node_cert_path: &Path,
    node_key_path: &Path,
) -> anyhow::Result<()> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, Issuer, KeyPair};

    let mut ca_params = CertificateParams::new(Vec::new())?;
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut ca_dn = DistinguishedName::new();
    ca_dn.push(DnType::CommonName, "Symphony Development CA");
    ca_params.distinguished_name = ca_dn;
    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params.self_signed(&ca_key)?;

    std::fs::write(ca_cert_path, ca_cert.pem())?;
    std::fs::write(ca_key_path, ca_key.serialize_pem())?;

    let issuer = Issuer::new(ca_params_for_signing(), &ca_key);

    let server_key = KeyPair::generate()?;
    let server_params = CertificateParams::new(vec!["localhost".to_string(), "symphony-conductor".to_string()])?;
    let server_cert = server_params.signed_by(&server_key, &issuer)?;
    std::fs::write(server_cert_path, server_cert.pem())?;
    std::fs::write(server_key_path, server_key.serialize_pem())?;

    let node_key = KeyPair::generate()?;
    let node_params = CertificateParams::new(vec!["symphony-node".to_string()])?;
    let node_cert = node_params.signed_by(&node_key, &issuer)?;
    std::fs::write(node_cert_path, node_cert.pem())?;
    std::fs::write(node_key_path, node_key.serialize_pem())?;

    Ok(())
}

/// Re-derive the CA's `CertificateParams` for use as a signing issuer.
/// `rcgen`'s `Issuer` needs the original params alongside the key pair; we
/// keep this as a tiny separate constructor so `generate_bundle` doesn't
/// need to thread the CA's params through two call sites by value.
fn ca_params_for_signing() -> rcgen::CertificateParams {
    use rcgen::{CertificateParams, DistinguishedName, DnType};
    let mut params = CertificateParams::new(Vec::new()).expect("empty SAN list is always valid");
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Symphony Development CA");
    params.distinguished_name = dn;
    params
}
