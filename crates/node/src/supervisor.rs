//! The node supervisor: one actor task per deployment driving the state
//! machine from spec.md §4.7:
//!
//! ```text
//! IDLE ──START──▶ STARTING ──ready──▶ RUNNING
//!   ▲                │                   │
//!   │                └──exit──▶ FAILED ──┤
//!   │                                    │
//!   └──STOPPED ◀── STOPPING ◀────STOP────┘
//! ```
//!
//! Each actor owns its [`ExecutionTarget`] exclusively, so there is no
//! shared-mutable-state lock spanning deployments (spec.md §9 "concurrency
//! instead of shared mutable state") — the [`Supervisor`] itself only
//! guards the `deployment_id -> actor handle` map.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use symphony_core::model::{CurrentState, LogEntry, LogStream};

use crate::docker_backend::DockerTarget;
use crate::exec_backend::ExecTarget;
use crate::health::HEALTH_POLL_INTERVAL;
use crate::log_hub::NodeLogHub;
use crate::restart::RestartState;
use crate::spec::{self, DecodedSpec};
use crate::target::{CapturedLine, ExecutionTarget, ExitOutcome};

/// Default `STARTING -> RUNNING` grace period absent an explicit readiness
/// signal (spec.md §4.7 "Start").
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(1);
/// Default force-kill escalation grace (spec.md §4.7 "Stop").
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
/// Inbound command queue depth per deployment actor.
const ACTOR_QUEUE_CAPACITY: usize = 32;
/// Captured-line channel depth per running target.
const LINES_QUEUE_CAPACITY: usize = 256;

/// A command the session layer hands to a deployment's actor, already
/// decoded off the wire (`symphony-node`'s proto-agnostic internal
/// vocabulary, mirroring `symphony-reconciler::Command`'s split from
/// `symphony-conductor::sink`'s wire encoding).
#[derive(Debug, Clone)]
pub enum ActorCommand {
    Apply { spec_revision: u64, deployment_kind: String, specification_json: String },
    Stop { spec_revision: u64 },
    Cancel,
}

/// What the supervisor reports back to the session layer for inclusion in
/// a `Heartbeat`/`DeploymentStatusList` frame, or pushed immediately on a
/// state change (spec.md §4.7 "Reporting").
#[derive(Debug, Clone)]
pub struct DeploymentStatusReport {
    pub deployment_id: String,
    pub current_state: CurrentState,
    pub exit_code: Option<i32>,
    pub revision_acked: u64,
}

struct ActorHandle {
    command_tx: mpsc::Sender<ActorCommand>,
}

/// Owns every deployment actor on this node.
pub struct Supervisor {
    actors: RwLock<HashMap<String, ActorHandle>>,
    log_hub: std::sync::Arc<NodeLogHub>,
    status_tx: mpsc::Sender<DeploymentStatusReport>,
}

impl Supervisor {
    pub fn new(log_hub: std::sync::Arc<NodeLogHub>, status_tx: mpsc::Sender<DeploymentStatusReport>) -> Self {
        Self { actors: RwLock::new(HashMap::new()), log_hub, status_tx }
    }

    /// Route a decoded `DeploymentReq`/`DeploymentCancel` to its actor,
    /// spawning one on first sight of the deployment.
    pub async fn dispatch(&self, deployment_id: &str, command: ActorCommand) {
        let mut actors = self.actors.write().await;
        let handle = actors.entry(deployment_id.to_string()).or_insert_with(|| {
            self.spawn_actor(deployment_id.to_string())
        });
        if handle.command_tx.send(command).await.is_err() {
            warn!(deployment_id, "actor command channel closed, dropping command");
        }
    }

    fn spawn_actor(&self, deployment_id: String) -> ActorHandle {
        let (command_tx, command_rx) = mpsc::channel(ACTOR_QUEUE_CAPACITY);
        let log_hub = self.log_hub.clone();
        let status_tx = self.status_tx.clone();
        let id_for_task = deployment_id.clone();
        tokio::spawn(async move {
            let mut actor = DeploymentActor::new(id_for_task, log_hub, status_tx);
            actor.run(command_rx).await;
        });
        ActorHandle { command_tx }
    }

    /// Every actor's last-known status, for the periodic `Heartbeat`.
    /// `symphony-node`'s session keeps its own authoritative copy updated
    /// from the immediate-push channel; this is only used at session
    /// (re)start before any push has arrived.
    pub async fn deployment_ids(&self) -> Vec<String> {
        self.actors.read().await.keys().cloned().collect()
    }
}

enum RunState {
    Idle,
    Starting { target: ExecutionTarget, lines_rx: mpsc::Receiver<CapturedLine>, deadline: Instant },
    Running { target: ExecutionTarget, lines_rx: mpsc::Receiver<CapturedLine> },
    BackingOff,
}

/// Outcome of one `select!` poll while `RunState::Starting`. Kept as a
/// plain owned value so the borrow of `self.run_state`'s fields ends before
/// any handler needs `&mut self`.
enum StartingEvent {
    Command(Option<ActorCommand>),
    Line(Option<CapturedLine>),
    Ready,
    Exited(ExitOutcome),
}

/// Outcome of one `select!` poll while `RunState::Running`, same rationale
/// as [`StartingEvent`].
enum RunningEvent {
    Command(Option<ActorCommand>),
    Line(Option<CapturedLine>),
    Exited(ExitOutcome),
    HealthTick,
}

struct DeploymentActor {
    deployment_id: String,
    log_hub: std::sync::Arc<NodeLogHub>,
    status_tx: mpsc::Sender<DeploymentStatusReport>,
    revision_applied: u64,
    current_spec: Option<DecodedSpec>,
    restart: Option<RestartState>,
    run_state: RunState,
}

impl DeploymentActor {
    fn new(deployment_id: String, log_hub: std::sync::Arc<NodeLogHub>, status_tx: mpsc::Sender<DeploymentStatusReport>) -> Self {
        Self {
            deployment_id,
            log_hub,
            status_tx,
            revision_applied: 0,
            current_spec: None,
            restart: None,
            run_state: RunState::Idle,
        }
    }

    async fn run(&mut self, mut command_rx: mpsc::Receiver<ActorCommand>) {
        loop {
            match &self.run_state {
                RunState::Idle | RunState::BackingOff => {
                    let Some(command) = command_rx.recv().await else { return };
                    if !self.handle_command(command).await {
                        return;
                    }
                }
                RunState::Starting { .. } => {
                    // Destructure `self.run_state` exactly once into its
                    // disjoint fields so `target.wait_exit()` and
                    // `lines_rx.recv()` can run as concurrent `select!`
                    // branches without both holding `&mut self.run_state` as
                    // a whole (that would be two overlapping mutable
                    // borrows of the same place). Every branch below only
                    // produces an owned `Event`; none of them touch `self`
                    // until after this block ends and the borrow is over.
                    let event = {
                        let RunState::Starting { target, lines_rx, deadline } = &mut self.run_state else {
                            unreachable!("match above guarantees Starting")
                        };
                        let deadline = *deadline;
                        tokio::select! {
                            maybe_command = command_rx.recv() => StartingEvent::Command(maybe_command),
                            line = lines_rx.recv() => StartingEvent::Line(line),
                            _ = tokio::time::sleep_until(deadline) => StartingEvent::Ready,
                            outcome = target.wait_exit() => StartingEvent::Exited(outcome),
                        }
                    };

                    match event {
                        StartingEvent::Command(Some(command)) => {
                            if !self.handle_command(command).await {
                                return;
                            }
                        }
                        StartingEvent::Command(None) => return,
                        StartingEvent::Line(Some(line)) => self.on_line(line).await,
                        StartingEvent::Line(None) => {}
                        StartingEvent::Ready => self.on_ready().await,
                        StartingEvent::Exited(outcome) => self.on_exit(outcome, CurrentState::Starting).await,
                    }
                }
                RunState::Running { .. } => {
                    let event = {
                        let RunState::Running { target, lines_rx } = &mut self.run_state else {
                            unreachable!("match above guarantees Running")
                        };
                        tokio::select! {
                            maybe_command = command_rx.recv() => RunningEvent::Command(maybe_command),
                            line = lines_rx.recv() => RunningEvent::Line(line),
                            outcome = target.wait_exit() => RunningEvent::Exited(outcome),
                            _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => RunningEvent::HealthTick,
                        }
                    };

                    match event {
                        RunningEvent::Command(Some(command)) => {
                            if !self.handle_command(command).await {
                                return;
                            }
                        }
                        RunningEvent::Command(None) => return,
                        RunningEvent::Line(Some(line)) => self.on_line(line).await,
                        RunningEvent::Line(None) => {}
                        RunningEvent::Exited(outcome) => self.on_exit(outcome, CurrentState::Running).await,
                        RunningEvent::HealthTick => self.on_health_tick().await,
                    }
                }
            }
        }
    }

    /// Returns `false` when the actor should exit (a `Cancel` with no
    /// assignment left to manage).
    async fn handle_command(&mut self, command: ActorCommand) -> bool {
        match command {
            ActorCommand::Apply { spec_revision, deployment_kind, specification_json } => {
                if spec_revision <= self.revision_applied {
                    return true; // spec.md §4.3 idempotence rule
                }
                let decoded = match spec::decode(&deployment_kind, &specification_json) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!(deployment_id = %self.deployment_id, error = %err, "rejecting invalid specification");
                        self.push_system_log(format!("invalid specification: {err}")).await;
                        self.report(CurrentState::Failed, Some(-1)).await;
                        return true;
                    }
                };

                self.terminate_current().await;
                self.revision_applied = spec_revision;
                self.restart = Some(RestartState::new(decoded.restart_policy().clone()));
                self.current_spec = Some(decoded);
                self.start_current().await;
                true
            }
            ActorCommand::Stop { spec_revision } => {
                // Per spec.md §4.3, STOP always applies regardless of spec_revision ordering.
                let _ = spec_revision;
                self.terminate_current().await;
                self.report(CurrentState::Stopped, None).await;
                self.run_state = RunState::Idle;
                true
            }
            ActorCommand::Cancel => {
                self.terminate_current().await;
                // Report Stopped before tearing the actor down: the
                // reconciler's `reconcile_deletions` only purges a still-
                // assigned deployment once it observes Stopped/Failed, with
                // no timeout fallback, so a Cancel that never reports
                // Stopped would leave the record (and its reserved
                // capacity and name) stuck forever.
                self.report(CurrentState::Stopped, None).await;
                self.log_hub.remove(&self.deployment_id).await;
                false
            }
        }
    }

    async fn start_current(&mut self) {
        let Some(spec) = self.current_spec.clone() else { return };
        let (lines_tx, lines_rx) = mpsc::channel(LINES_QUEUE_CAPACITY);

        let target = match &spec {
            DecodedSpec::Exec(exec_spec) => ExecTarget::spawn(exec_spec, lines_tx).await.map(ExecutionTarget::Exec),
            DecodedSpec::Docker(docker_spec) => {
                DockerTarget::spawn(&self.deployment_id, docker_spec, lines_tx).await.map(ExecutionTarget::Docker)
            }
        };

        match target {
            Ok(target) => {
                let deadline = Instant::now() + startup_grace(&spec);
                self.run_state = RunState::Starting { target, lines_rx, deadline };
                self.report(CurrentState::Starting, None).await;
            }
            Err(err) => {
                warn!(deployment_id = %self.deployment_id, error = %err, "spawn failed");
                self.push_system_log(format!("spawn failed: {err}")).await;
                self.run_state = RunState::Idle;
                self.report(CurrentState::Failed, Some(-1)).await;
                self.schedule_restart_if_applicable().await;
            }
        }
    }

    async fn on_ready(&mut self) {
        if let RunState::Starting { .. } = &self.run_state {
            self.transition_starting_to_running().await;
        }
    }

    async fn on_line(&mut self, line: CapturedLine) {
        let readiness_match = matches!(&self.run_state, RunState::Starting { .. })
            && self
                .current_spec
                .as_ref()
                .and_then(DecodedSpec::readiness_line)
                .is_some_and(|needle| line.line.contains(needle));

        self.log_hub
            .push(&self.deployment_id, LogEntry { timestamp_unix_ms: now_ms(), stream: line.stream, line: line.line })
            .await;

        if readiness_match {
            self.transition_starting_to_running().await;
        }
    }

    async fn transition_starting_to_running(&mut self) {
        let RunState::Starting { target, lines_rx, .. } = std::mem::replace(&mut self.run_state, RunState::Idle) else {
            return;
        };
        self.run_state = RunState::Running { target, lines_rx };
        if let Some(restart) = &mut self.restart {
            restart.reset();
        }
        self.report(CurrentState::Running, None).await;
    }

    async fn on_health_tick(&mut self) {
        let alive = match &mut self.run_state {
            RunState::Running { target, .. } => target.is_alive().await,
            _ => return,
        };
        if !alive {
            warn!(deployment_id = %self.deployment_id, "health poll found target no longer alive");
            self.push_system_log("health check detected unexpected exit".to_string()).await;
            let outcome = match &mut self.run_state {
                RunState::Running { target, .. } => target.wait_exit().await,
                _ => return,
            };
            self.on_exit(outcome, CurrentState::Running).await;
        }
    }

    async fn on_exit(&mut self, outcome: ExitOutcome, from: CurrentState) {
        self.run_state = RunState::Idle;
        match (from, outcome) {
            (CurrentState::Stopping, _) => {
                self.report(CurrentState::Stopped, exit_code(outcome)).await;
            }
            (_, ExitOutcome::Exited(0)) => {
                self.report(CurrentState::Stopped, Some(0)).await;
            }
            (_, outcome) => {
                self.report(CurrentState::Failed, exit_code(outcome)).await;
                self.schedule_restart_if_applicable().await;
            }
        }
    }

    async fn schedule_restart_if_applicable(&mut self) {
        let Some(restart) = &mut self.restart else { return };
        if !restart.restarts_on_failure() {
            return;
        }
        let backoff = restart.record_failure_and_next_backoff();
        info!(deployment_id = %self.deployment_id, backoff_secs = backoff.as_secs(), "scheduling restart");
        self.run_state = RunState::BackingOff;
        tokio::time::sleep(backoff).await;
        if matches!(self.run_state, RunState::BackingOff) {
            self.run_state = RunState::Idle;
            self.start_current().await;
        }
    }

    async fn terminate_current(&mut self) {
        let previous = std::mem::replace(&mut self.run_state, RunState::Idle);
        match previous {
            RunState::Starting { mut target, .. } | RunState::Running { mut target, .. } => {
                target.terminate(DEFAULT_STOP_GRACE).await;
            }
            RunState::Idle | RunState::BackingOff => {}
        }
    }

    async fn push_system_log(&self, line: String) {
        self.log_hub
            .push(&self.deployment_id, LogEntry { timestamp_unix_ms: now_ms(), stream: LogStream::System, line })
            .await;
    }

    async fn report(&self, current_state: CurrentState, exit_code: Option<i32>) {
        let _ = self
            .status_tx
            .send(DeploymentStatusReport {
                deployment_id: self.deployment_id.clone(),
                current_state,
                exit_code,
                revision_acked: self.revision_applied,
            })
            .await;
    }
}

fn exit_code(outcome: ExitOutcome) -> Option<i32> {
    match outcome {
        ExitOutcome::Exited(code) => Some(code),
        ExitOutcome::Killed => Some(-1),
    }
}

fn startup_grace(spec: &DecodedSpec) -> Duration {
    if spec.readiness_line().is_some() {
        // A readiness-line deployment is still bounded, so a process that
        // never emits it doesn't wedge the actor forever.
        DEFAULT_STARTUP_GRACE * 30
    } else {
        DEFAULT_STARTUP_GRACE
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
