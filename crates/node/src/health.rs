//! Health-poll cadence shared between the supervisor's per-actor liveness
//! check (spec.md §4.7 implicit "the conductor is notified of each
//! transition" guarantee even when no log line or exit event would
//! otherwise surface a dead-but-silent child) and anything else on the
//! node that wants the same rhythm.

use std::time::Duration;

/// How often a running target's liveness is polled independent of its
/// exit-wait future, grounded on the teacher's health monitor loop in
/// `runtime-core/src/python/multiprocess/process_manager.rs` polling
/// `is_alive()` on a fixed interval.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
