//! Symphony conductor library: the node session handshake/processing loop,
//! the gRPC service that accepts node streams, the reconciler's
//! transport-facing `CommandSink`, log fan-out, and dev-mode mTLS
//! certificate bootstrap. `src/main.rs` wires these into a running binary.

pub mod certs;
pub mod config;
pub mod service;
pub mod session;
pub mod sink;

pub use symphony_proto::log_hub;
