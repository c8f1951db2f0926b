//! DOCKER backend, grounded on the teacher's `DockerSupport`
//! (`runtime-core/src/python/multiprocess/docker_support.rs`):
//! `create_container`/`start_container` to stand a container up,
//! `inspect_container` polled for `state.running` to mirror EXEC's
//! `is_alive()`, `stop_container` with an escalation to `kill_container`
//! to mirror EXEC's SIGTERM-then-kill `terminate()`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{Config, CreateContainerOptions, LogOutput, LogsOptions};
use bollard::query_parameters::{
    InspectContainerOptions, KillContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use symphony_core::error::{Error, Result};
use symphony_core::model::LogStream;

use crate::spec::DockerSpec;
use crate::target::{CapturedLine, ExitOutcome};

/// A running (or starting) container plus the daemon connection it was
/// created through.
pub struct DockerTarget {
    docker: Arc<Docker>,
    container_id: String,
}

impl DockerTarget {
    /// Create and start a container from `spec`, then spawn a task
    /// following its combined stdout/stderr into `lines_tx` until the
    /// container exits or the stream errors.
    pub async fn spawn(
        deployment_id: &str,
        spec: &DockerSpec,
        lines_tx: mpsc::Sender<CapturedLine>,
    ) -> Result<Self> {
        let docker = Arc::new(Docker::connect_with_local_defaults().map_err(|err| Error::Execution {
            deployment_id: deployment_id.to_string(),
            node_id: String::new(),
            reason: format!("failed to connect to Docker daemon: {err}"),
        })?);

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut labels = HashMap::new();
        labels.insert("symphony.deployment_id".to_string(), deployment_id.to_string());

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            env: Some(env),
            labels: Some(labels),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: Some(format!("symphony-{deployment_id}")),
            platform: None,
        };

        let response = docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|err| Error::Execution {
                deployment_id: deployment_id.to_string(),
                node_id: String::new(),
                reason: format!("failed to create container: {err}"),
            })?;
        let container_id = response.id;

        docker
            .start_container(&container_id, None::<StartContainerOptions>)
            .await
            .map_err(|err| Error::Execution {
                deployment_id: deployment_id.to_string(),
                node_id: String::new(),
                reason: format!("failed to start container {container_id}: {err}"),
            })?;

        spawn_log_follower(docker.clone(), container_id.clone(), lines_tx);

        Ok(Self { docker, container_id })
    }

    pub async fn is_alive(&mut self) -> bool {
        match self
            .docker
            .inspect_container(&self.container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info.state.and_then(|s| s.running).unwrap_or(false),
            Err(err) => {
                warn!(container_id = %self.container_id, error = %err, "inspect_container failed, assuming dead");
                false
            }
        }
    }

    pub async fn wait_exit(&mut self) -> ExitOutcome {
        let options = WaitContainerOptions { condition: "not-running".to_string() };
        let mut stream = self.docker.wait_container(&self.container_id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => ExitOutcome::Exited(response.status_code as i32),
            Some(Err(err)) => {
                warn!(container_id = %self.container_id, error = %err, "wait_container errored");
                ExitOutcome::Killed
            }
            None => ExitOutcome::Killed,
        }
    }

    pub async fn terminate(&mut self, grace: Duration) {
        let options = StopContainerOptions { t: Some(grace.as_secs() as i32), signal: None };
        if let Err(err) = self.docker.stop_container(&self.container_id, Some(options)).await {
            warn!(container_id = %self.container_id, error = %err, "stop_container failed");
        }

        if self.is_alive().await {
            warn!(container_id = %self.container_id, "container still running after stop_container grace, force-killing");
            let _ = self
                .docker
                .kill_container(&self.container_id, None::<KillContainerOptions>)
                .await;
        }

        let _ = self
            .docker
            .remove_container(
                &self.container_id,
                Some(RemoveContainerOptions { force: true, v: true, link: false }),
            )
            .await;
    }
}

fn spawn_log_follower(docker: Arc<Docker>, container_id: String, tx: mpsc::Sender<CapturedLine>) {
    tokio::spawn(async move {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "0".to_string(),
            ..Default::default()
        };
        let mut stream = docker.logs(&container_id, Some(options));
        while let Some(chunk) = stream.next().await {
            let (stream_tag, line) = match chunk {
                Ok(LogOutput::StdOut { message }) => (LogStream::Stdout, message),
                Ok(LogOutput::StdErr { message }) => (LogStream::Stderr, message),
                Ok(_) => continue,
                Err(err) => {
                    warn!(container_id = %container_id, error = %err, "container log stream errored");
                    break;
                }
            };
            let line = String::from_utf8_lossy(&line).trim_end().to_string();
            if tx.send(CapturedLine { stream: stream_tag, line }).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_spec_env_renders_as_key_equals_value() {
        let mut env = HashMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        let rendered: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        assert_eq!(rendered, vec!["FOO=bar".to_string()]);
    }
}
