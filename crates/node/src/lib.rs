//! Node-side execution supervisor: decodes a deployment's opaque
//! `specification` per `kind` (spec.md §9 "Dynamic specifications"),
//! drives the EXEC/DOCKER backends behind one [`target::ExecutionTarget`]
//! (grounded on the teacher's `process_manager.rs`), and maintains the
//! persistent gRPC session to the conductor.

pub mod certs;
pub mod config;
pub mod docker_backend;
pub mod exec_backend;
pub mod health;
pub mod log_hub;
pub mod resources;
pub mod restart;
pub mod session;
pub mod spec;
pub mod supervisor;
pub mod target;

pub use config::Config;
pub use supervisor::Supervisor;
