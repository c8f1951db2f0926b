//! Decodes the opaque `specification` JSON blob carried on `DeploymentReq`
//! into a per-kind structured form (spec.md §9 "Dynamic specifications":
//! "a schemaless structured blob with a versioned per-kind schema validated
//! at the node boundary").

use std::collections::HashMap;

use serde::Deserialize;

use symphony_core::error::{Error, Result};

/// Restart policy type. Only `OnFailure` is implemented, per spec.md §9's
/// explicit instruction not to infer additional policy types; any other
/// value deserializes fine but is treated as "never restart" by
/// [`crate::restart::RestartState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartType {
    Never,
    OnFailure,
}

impl Default for RestartType {
    fn default() -> Self {
        RestartType::Never
    }
}

/// Mirrors `restart_policy.type` / `restart_policy.backoff_seconds` as
/// named in spec.md §4.7 and §9.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    #[serde(rename = "type")]
    pub kind: RestartType,
    pub backoff_seconds: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self { kind: RestartType::Never, backoff_seconds: 5 }
    }
}

/// Specification for an EXEC-kind deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Signals that `STARTING → RUNNING` should wait on a readiness line on
    /// stdout instead of the fixed grace period (spec.md §4.7 "or on an
    /// explicit readiness signal if the spec declares one").
    pub readiness_line: Option<String>,
}

impl Default for ExecSpec {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            restart_policy: RestartPolicy::default(),
            readiness_line: None,
        }
    }
}

/// Specification for a DOCKER-kind deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerSpec {
    pub image: String,
    pub command: Option<Vec<String>>,
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    pub readiness_line: Option<String>,
}

impl Default for DockerSpec {
    fn default() -> Self {
        Self {
            image: String::new(),
            command: None,
            env: HashMap::new(),
            restart_policy: RestartPolicy::default(),
            readiness_line: None,
        }
    }
}

/// The decoded specification, tagged by backend.
#[derive(Debug, Clone)]
pub enum DecodedSpec {
    Exec(ExecSpec),
    Docker(DockerSpec),
}

impl DecodedSpec {
    pub fn restart_policy(&self) -> &RestartPolicy {
        match self {
            DecodedSpec::Exec(s) => &s.restart_policy,
            DecodedSpec::Docker(s) => &s.restart_policy,
        }
    }

    pub fn readiness_line(&self) -> Option<&str> {
        match self {
            DecodedSpec::Exec(s) => s.readiness_line.as_deref(),
            DecodedSpec::Docker(s) => s.readiness_line.as_deref(),
        }
    }
}

/// Parse `specification_json` for `deployment_kind` ("exec" | "docker"),
/// per spec.md §9. Unknown kinds and malformed JSON are rejected as
/// `Validation` errors rather than crashing the supervisor task.
pub fn decode(deployment_kind: &str, specification_json: &str) -> Result<DecodedSpec> {
    match deployment_kind {
        "exec" => {
            let spec: ExecSpec = serde_json::from_str(specification_json).map_err(|err| {
                Error::Validation(format!("invalid exec specification: {err}"))
            })?;
            if spec.command.is_empty() {
                return Err(Error::Validation("exec specification requires a non-empty command".into()));
            }
            Ok(DecodedSpec::Exec(spec))
        }
        "docker" => {
            let spec: DockerSpec = serde_json::from_str(specification_json).map_err(|err| {
                Error::Validation(format!("invalid docker specification: {err}"))
            })?;
            if spec.image.is_empty() {
                return Err(Error::Validation("docker specification requires an image".into()));
            }
            Ok(DecodedSpec::Docker(spec))
        }
        other => Err(Error::Validation(format!("unknown deployment kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exec_spec_with_restart_policy() {
        let json = r#"{"command":["/bin/true"],"restart_policy":{"type":"on-failure","backoff_seconds":2}}"#;
        let decoded = decode("exec", json).unwrap();
        match decoded {
            DecodedSpec::Exec(spec) => {
                assert_eq!(spec.command, vec!["/bin/true".to_string()]);
                assert_eq!(spec.restart_policy.kind, RestartType::OnFailure);
                assert_eq!(spec.restart_policy.backoff_seconds, 2);
            }
            _ => panic!("expected exec spec"),
        }
    }

    #[test]
    fn defaults_restart_policy_to_never() {
        let decoded = decode("exec", r#"{"command":["/bin/true"]}"#).unwrap();
        match decoded {
            DecodedSpec::Exec(spec) => assert_eq!(spec.restart_policy.kind, RestartType::Never),
            _ => panic!("expected exec spec"),
        }
    }

    #[test]
    fn rejects_empty_command() {
        assert!(decode("exec", r#"{"command":[]}"#).is_err());
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(decode("lxc", r#"{}"#).is_err());
    }

    #[test]
    fn rejects_docker_spec_without_image() {
        assert!(decode("docker", r#"{}"#).is_err());
    }
}
