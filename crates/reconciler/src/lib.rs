//! The reconciliation loop: watches desired/current/assignment divergence
//! and emits placement, start, update, stop and reassign commands
//! (`spec.md` §4.6).
//!
//! The reconciler holds no transport of its own — it reads the deployment
//! store and node registry, decides through the scheduler and ledger, and
//! writes commands through a [`CommandSink`] the embedding binary
//! (`symphony-conductor`) implements over real node sessions.

mod assignment_table;
mod breaker;
mod sink;

pub use assignment_table::AssignmentTable;
pub use breaker::CircuitBreaker;
pub use sink::{cancel_command, start_command, stop_command, update_command, Command, CommandSink, SendError};

use std::sync::Arc;
use std::time::Duration;

use symphony_core::model::{reason, Assignment, Connectivity, CurrentState, DesiredState};
use symphony_core::{Scheduler, SharedLedger, SharedRegistry};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default periodic sweep interval, within the recognized 1-5s range
/// (`spec.md` §4.6 "Pacing").
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Summary of one [`Reconciler::tick`], for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub placed: u32,
    pub placement_failed: u32,
    pub updates_sent: u32,
    pub stops_sent: u32,
    pub reassigned_on_loss: u32,
    pub purged: u32,
}

/// One coordinating reconciliation loop per conductor (`spec.md` §4.6).
///
/// Generic over `H`, the per-node command handle type `NodeRegistry<H>` is
/// keyed on — the reconciler never touches `H` directly, it only needs the
/// registry's group/connectivity queries, so any session-handle type the
/// conductor chooses works here unchanged.
pub struct Reconciler<H> {
    store: symphony_core::store::SharedStore,
    registry: SharedRegistry<H>,
    ledger: SharedLedger,
    scheduler: Scheduler,
    assignments: AssignmentTable,
    breaker: CircuitBreaker,
    sink: Arc<dyn CommandSink>,
}

impl<H: Clone + Send + Sync + 'static> Reconciler<H> {
    /// Build a reconciler over the given components. `sink` delivers
    /// commands to node sessions; see [`CommandSink`].
    pub fn new(
        store: symphony_core::store::SharedStore,
        registry: SharedRegistry<H>,
        ledger: SharedLedger,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            store,
            registry,
            ledger,
            scheduler: Scheduler::new(),
            assignments: AssignmentTable::new(),
            breaker: CircuitBreaker::new(),
            sink,
        }
    }

    /// Run the reconciler forever: a periodic sweep plus edge-triggered
    /// wakeups delivered on `wake` (e.g. from a deployment-change
    /// notification or a node registry event), per §4.6's two trigger
    /// kinds. Returns only when `wake` is dropped (conductor shutdown).
    pub async fn run(&self, mut wake: mpsc::Receiver<()>, sweep_interval: Duration) {
        let mut sweep = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    let report = self.tick(now_ms()).await;
                    debug!(?report, "periodic sweep");
                }
                woken = wake.recv() => {
                    match woken {
                        Some(()) => {
                            let report = self.tick(now_ms()).await;
                            debug!(?report, "edge-triggered tick");
                        }
                        None => {
                            info!("reconciler wake channel closed, shutting down");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Notify the node registry/deployment store had an event worth
    /// reconciling immediately, without waiting for the next sweep. Exposed
    /// so callers holding only an `Arc<Reconciler<H>>` plus a cloned
    /// `mpsc::Sender<()>` can edge-trigger a tick.
    pub async fn tick(&self, now_ms: i64) -> TickReport {
        let mut report = TickReport::default();

        self.reconcile_deletions(now_ms, &mut report).await;

        // A generous page size: the reconciler caps per-tick work only in
        // the sense that a single tick processes one full pass; starvation
        // across ticks is avoided because every deployment is re-evaluated
        // every sweep regardless of where a previous tick left off.
        let all = self.store.list(10_000, 0).await;
        for deployment in all {
            if deployment.deleted {
                continue;
            }
            let live = self.assignments.get(&deployment.id).await;
            match live {
                None => {
                    if deployment.desired_state == DesiredState::Running {
                        self.reconcile_unassigned(&deployment, now_ms, &mut report).await;
                    }
                }
                Some(assignment) => {
                    self.reconcile_assigned(&deployment, assignment, now_ms, &mut report).await;
                }
            }
        }

        self.check_capacity_invariant(now_ms).await;

        report
    }

    /// I2: for every connected node, `0 <= reserved <= total` on every
    /// capacity label. The ledger's own `try_reserve`/`release` arithmetic
    /// already keeps this true by construction; this is the conductor-wide
    /// cross-check that the spec's error-handling design treats as fatal
    /// (`spec.md` §7 "conductor-wide invariant violations ... are fatal and
    /// must abort after logging — data integrity beats availability here").
    /// A violation here means the ledger and registry have desynced in a
    /// way no normal code path should allow, so this aborts the process
    /// rather than attempting to repair state it can no longer trust.
    async fn check_capacity_invariant(&self, now_ms: i64) {
        for node in self.registry.snapshot().await {
            if node.connectivity(now_ms) != Connectivity::Connected {
                continue;
            }
            let Some(reserved) = self.ledger.reserved(&node.node_id).await else {
                continue;
            };
            if !reserved.within_bounds(&node.capacities_total) {
                error!(
                    node_id = %node.node_id,
                    ?reserved,
                    total = ?node.capacities_total,
                    "I2 violated: reserved capacity out of bounds, aborting"
                );
                std::process::abort();
            }
        }
    }

    async fn reconcile_deletions(&self, now_ms: i64, report: &mut TickReport) {
        for deployment in self.store.pending_deletion().await {
            match self.assignments.get(&deployment.id).await {
                None => {
                    self.store.purge(&deployment.id).await;
                    report.purged += 1;
                }
                Some(assignment) => {
                    if matches!(deployment.current_state, CurrentState::Stopped | CurrentState::Failed) {
                        self.ledger
                            .release(&assignment.node_id, &deployment.capacity_requests)
                            .await;
                        self.assignments.remove(&deployment.id).await;
                        self.store.purge(&deployment.id).await;
                        report.purged += 1;
                    } else {
                        self.send(&assignment.node_id, cancel_command(&deployment.id), now_ms)
                            .await;
                    }
                }
            }
        }
    }

    async fn reconcile_unassigned(
        &self,
        deployment: &symphony_core::model::Deployment,
        now_ms: i64,
        report: &mut TickReport,
    ) {
        let mut candidates = self
            .registry
            .nodes_in_group(&deployment.node_group, now_ms)
            .await;
        // Nodes whose breaker is open are treated as ineligible for new
        // placements this tick, same as `Stale` (SPEC_FULL §4.6 supplement).
        let mut eligible = Vec::with_capacity(candidates.len());
        for node in candidates.drain(..) {
            if !self.breaker.is_open(&node.node_id, now_ms).await {
                eligible.push(node);
            }
        }

        let outcome = self
            .scheduler
            .place(&eligible, &deployment.capacity_requests, &self.ledger, now_ms)
            .await;

        match outcome {
            symphony_core::scheduler::PlacementOutcome::Placed(node_id) => {
                self.assignments
                    .insert(Assignment::new(deployment.id.clone(), node_id.clone(), now_ms))
                    .await;
                self.store
                    .set_assignment(&deployment.id, Some(node_id.clone()), None, now_ms)
                    .await;
                self.send(&node_id, start_command(deployment), now_ms).await;
                report.placed += 1;
            }
            symphony_core::scheduler::PlacementOutcome::InsufficientCapacity => {
                self.store
                    .set_assignment(&deployment.id, None, Some(reason::INSUFFICIENT_CAPACITY.to_string()), now_ms)
                    .await;
                report.placement_failed += 1;
            }
            symphony_core::scheduler::PlacementOutcome::NoEligibleNode => {
                self.store
                    .set_assignment(&deployment.id, None, Some(reason::NO_ELIGIBLE_NODE.to_string()), now_ms)
                    .await;
                report.placement_failed += 1;
            }
            symphony_core::scheduler::PlacementOutcome::NoCapacity => {
                self.store
                    .set_assignment(&deployment.id, None, Some(reason::NO_CAPACITY.to_string()), now_ms)
                    .await;
                report.placement_failed += 1;
            }
        }
    }

    async fn reconcile_assigned(
        &self,
        deployment: &symphony_core::model::Deployment,
        assignment: Assignment,
        now_ms: i64,
        report: &mut TickReport,
    ) {
        let node = self.registry.get(&assignment.node_id).await;
        let disconnected = match &node {
            Some(record) => record.connectivity(now_ms) == Connectivity::Disconnected,
            None => true,
        };

        if disconnected {
            self.ledger
                .release(&assignment.node_id, &deployment.capacity_requests)
                .await;
            self.assignments.remove(&deployment.id).await;
            self.store
                .set_assignment(&deployment.id, None, Some(reason::NODE_DISCONNECTED.to_string()), now_ms)
                .await;
            report.reassigned_on_loss += 1;
            return;
        }

        match deployment.desired_state {
            DesiredState::Running => {
                if assignment.revision_acked < deployment.spec_revision {
                    let command = if matches!(deployment.current_state, CurrentState::Pending | CurrentState::Unknown) {
                        start_command(deployment)
                    } else {
                        update_command(deployment)
                    };
                    self.send(&assignment.node_id, command, now_ms).await;
                    report.updates_sent += 1;
                }
            }
            DesiredState::Stopped => {
                if !matches!(deployment.current_state, CurrentState::Stopped | CurrentState::Failed) {
                    self.send(&assignment.node_id, stop_command(deployment), now_ms).await;
                    report.stops_sent += 1;
                }
            }
        }
    }

    /// Record an external acknowledgment of `spec_revision` for a
    /// deployment (called by the conductor when a `DeploymentStatus`
    /// arrives over a session).
    pub async fn ack_revision(&self, deployment_id: &str, revision: u64) {
        self.assignments.ack_revision(deployment_id, revision).await;
    }

    async fn send(&self, node_id: &str, command: Command, now_ms: i64) {
        if self.breaker.is_open(node_id, now_ms).await {
            warn!(node_id, ?command, "breaker open, skipping command delivery this tick");
            return;
        }
        match self.sink.send(node_id, command).await {
            Ok(()) => self.breaker.record_success(node_id).await,
            Err(err) => {
                warn!(node_id, error = %err, "command delivery failed");
                self.breaker.record_failure(node_id, now_ms).await;
            }
        }
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
