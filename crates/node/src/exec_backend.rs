//! EXEC backend: a bare child process, grounded on the teacher's
//! `ProcessManager::spawn_node`/`terminate_process`
//! (`runtime-core/src/python/multiprocess/process_manager.rs`) — piped
//! stdio, its own process group on Unix so termination doesn't leak
//! grandchildren, SIGTERM-then-grace-then-kill shutdown.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::warn;

use symphony_core::error::{Error, Result};
use symphony_core::model::LogStream;

use crate::spec::ExecSpec;
use crate::target::{CapturedLine, ExitOutcome};

/// A spawned child process and its exit-waiting state.
pub struct ExecTarget {
    child: Child,
    pid: Option<u32>,
}

impl ExecTarget {
    /// Spawn `spec.command` with piped stdio; stdout/stderr lines are
    /// tagged and forwarded onto `lines_tx` as they arrive (spec.md §4.7
    /// "installs a reader per stream that tags lines with
    /// `{timestamp_unix_ms, stream, line}`" — the timestamp is stamped by
    /// the caller on receipt, not here).
    pub async fn spawn(spec: &ExecSpec, lines_tx: mpsc::Sender<CapturedLine>) -> Result<Self> {
        let Some(program) = spec.command.first() else {
            return Err(Error::Validation("exec specification requires a non-empty command".into()));
        };

        let mut command = Command::new(program);
        command.args(&spec.command[1..]);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(false);

        let mut child = command.spawn().map_err(|err| Error::Execution {
            deployment_id: String::new(),
            node_id: String::new(),
            reason: format!("failed to spawn {program}: {err}"),
        })?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, LogStream::Stdout, lines_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, LogStream::Stderr, lines_tx);
        }

        Ok(Self { child, pid })
    }

    pub async fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub async fn wait_exit(&mut self) -> ExitOutcome {
        match self.child.wait().await {
            Ok(status) => match status.code() {
                Some(code) => ExitOutcome::Exited(code),
                None => ExitOutcome::Killed,
            },
            Err(err) => {
                warn!(error = %err, "error waiting on child exit, treating as killed");
                ExitOutcome::Killed
            }
        }
    }

    pub async fn terminate(&mut self, grace: Duration) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => {}
                Err(_) => return,
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if matches!(self.child.try_wait(), Ok(None)) {
            warn!(pid = ?self.pid, "child did not exit within grace period, force-killing");
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}

fn spawn_reader<R>(reader: R, stream: LogStream, tx: mpsc::Sender<CapturedLine>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(CapturedLine { stream, line }).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "error reading child output stream");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec(command: &[&str]) -> ExecSpec {
        ExecSpec {
            command: command.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            working_dir: None,
            restart_policy: Default::default(),
            readiness_line: None,
        }
    }

    #[tokio::test]
    async fn spawns_and_captures_stdout() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut target = ExecTarget::spawn(&spec(&["/bin/echo", "hello"]), tx).await.unwrap();
        let outcome = target.wait_exit().await;
        assert_eq!(outcome, ExitOutcome::Exited(0));
        let captured = rx.recv().await.unwrap();
        assert_eq!(captured.line, "hello");
        assert_eq!(captured.stream, LogStream::Stdout);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let (tx, _rx) = mpsc::channel(16);
        let mut target = ExecTarget::spawn(&spec(&["/bin/sh", "-c", "exit 7"]), tx).await.unwrap();
        assert_eq!(target.wait_exit().await, ExitOutcome::Exited(7));
    }

    #[tokio::test]
    async fn terminate_stops_a_long_running_process() {
        let (tx, _rx) = mpsc::channel(16);
        let mut target = ExecTarget::spawn(&spec(&["/bin/sleep", "30"]), tx).await.unwrap();
        assert!(target.is_alive().await);
        target.terminate(Duration::from_secs(2)).await;
        assert!(!target.is_alive().await);
    }
}
