//! Symphony control-plane core: data model, node registry, capacity ledger,
//! scheduler and deployment store.
//!
//! This crate is transport-agnostic — it knows nothing about gRPC, HTTP, or
//! child processes. `symphony-conductor` wires these pieces to real node
//! sessions; `symphony-reconciler` drives them on a loop.

pub mod error;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};
pub use ledger::{CapacityLedger, ReserveOutcome, SharedLedger};
pub use registry::{NodeRegistry, RegisterOutcome, SharedRegistry};
pub use scheduler::{PlacementOutcome, Scheduler};
pub use store::{DeploymentPatch, DeploymentStore, InMemoryStore};
