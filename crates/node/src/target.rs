//! Unified handle over the two execution backends, grounded on the
//! teacher's `ExecutionTarget` enum in
//! `runtime-core/src/python/multiprocess/process_manager.rs` (there a
//! `Process(Child)` / `Container{container_id, docker_client}` split
//! behind one set of lifecycle methods; here `Exec`/`Docker`).

use std::time::Duration;

use symphony_core::model::LogStream;

use crate::docker_backend::DockerTarget;
use crate::exec_backend::ExecTarget;

/// One line captured from a running target's stdout/stderr.
#[derive(Debug, Clone)]
pub struct CapturedLine {
    pub stream: LogStream,
    pub line: String,
}

/// How a target's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with the given code (0 for clean exit).
    Exited(i32),
    /// Killed by a signal or force-removed without reporting a code.
    Killed,
}

/// A live child, either a bare OS process or a container, behind one
/// lifecycle surface the supervisor drives without caring which backend
/// it is.
pub enum ExecutionTarget {
    Exec(ExecTarget),
    Docker(DockerTarget),
}

impl ExecutionTarget {
    /// Poll liveness independent of whatever exit-waiting task is also
    /// watching this target — grounded on the teacher's health monitor
    /// polling `is_alive()` on its own cadence so a hung-but-silent
    /// process (no output, process table entry still present) is still
    /// caught.
    pub async fn is_alive(&mut self) -> bool {
        match self {
            ExecutionTarget::Exec(t) => t.is_alive().await,
            ExecutionTarget::Docker(t) => t.is_alive().await,
        }
    }

    /// Suspend until the target exits, returning how.
    pub async fn wait_exit(&mut self) -> ExitOutcome {
        match self {
            ExecutionTarget::Exec(t) => t.wait_exit().await,
            ExecutionTarget::Docker(t) => t.wait_exit().await,
        }
    }

    /// Graceful termination, escalating to a forced kill after `grace`
    /// (spec.md §4.7 "Stop").
    pub async fn terminate(&mut self, grace: Duration) {
        match self {
            ExecutionTarget::Exec(t) => t.terminate(grace).await,
            ExecutionTarget::Docker(t) => t.terminate(grace).await,
        }
    }
}
