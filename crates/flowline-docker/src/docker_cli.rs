// Docker CLI wrapper. Wraps `docker` invocations for container lifecycle
// management; the only component that talks to the daemon.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use flowline_common::RegistrySpec;

use crate::launch_spec::LaunchSpec;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerState};

/// Runs docker CLI commands.
pub struct DockerCli {
    docker_path: String,
}

impl DockerCli {
    /// Create a new `DockerCli` using `docker` from `PATH`.
    pub fn new() -> Self {
        Self {
            docker_path: "docker".to_string(),
        }
    }

    /// Create a new `DockerCli` with a custom docker binary path.
    pub fn with_path(docker_path: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Container lifecycle
    // -----------------------------------------------------------------------

    /// Create a container from a launch spec. Returns the container ID.
    async fn create_container(
        &self,
        spec: &LaunchSpec,
        cancel: CancellationToken,
    ) -> Result<String> {
        let mut args: Vec<String> = vec!["create".to_string()];

        args.push("--name".to_string());
        args.push(spec.container_name.clone());

        // docker create accepts a single network; remaining attachments go
        // through `network connect` after creation.
        if let Some(first) = spec.networks.first() {
            args.push("--network".to_string());
            args.push(first.clone());
        }

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.extend(build_kwargs_args(spec));

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let output = self.run_docker(&args, None, cancel).await?;
        Ok(output.trim().to_string())
    }

    /// Attach the container to networks beyond the first.
    async fn connect_extra_networks(
        &self,
        spec: &LaunchSpec,
        container_id: &str,
        cancel: CancellationToken,
    ) -> Result<()> {
        for network in spec.networks.iter().skip(1) {
            let args = vec![
                "network".to_string(),
                "connect".to_string(),
                network.clone(),
                container_id.to_string(),
            ];
            self.run_docker(&args, None, cancel.clone()).await?;
        }
        Ok(())
    }

    async fn start_container(&self, container_id: &str, cancel: CancellationToken) -> Result<()> {
        let args = vec!["start".to_string(), container_id.to_string()];
        self.run_docker(&args, None, cancel).await?;
        Ok(())
    }

    async fn pull_image(&self, image: &str, cancel: CancellationToken) -> Result<()> {
        let args = vec!["pull".to_string(), image.to_string()];
        self.run_docker(&args, None, cancel).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Run a docker command and return its stdout. Non-zero exit is an
    /// error carrying the command line and stderr. Cancellation kills the
    /// CLI process.
    async fn run_docker(
        &self,
        args: &[String],
        stdin_data: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<String> {
        tracing::debug!(target: "docker", "docker {}", args.join(" "));

        let mut command = Command::new(&self.docker_path);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if stdin_data.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.docker_path))?;

        if let Some(data) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.with_context(|| format!("docker {} failed", args.join(" ")))?
            }
            _ = cancel.cancelled() => {
                // kill_on_drop reaps the CLI process
                anyhow::bail!("docker {} cancelled", args.first().map(String::as_str).unwrap_or(""));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            anyhow::bail!(
                "docker {} exited with code {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        Ok(stdout)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Container state as reported by `docker inspect --format '{{json .State}}'`.
#[derive(Debug, Deserialize)]
struct InspectedState {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "ExitCode", default)]
    exit_code: i64,
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn login(&self, registry: &RegistrySpec, cancel: CancellationToken) -> Result<()> {
        let args = vec![
            "login".to_string(),
            registry.url.clone(),
            "-u".to_string(),
            registry.username.clone(),
            "--password-stdin".to_string(),
        ];
        self.run_docker(&args, Some(&registry.password), cancel)
            .await?;
        Ok(())
    }

    async fn create_and_start(
        &self,
        spec: &LaunchSpec,
        cancel: CancellationToken,
    ) -> Result<ContainerHandle> {
        // Create, pulling the image on demand if it is not present locally.
        let container_id = match self.create_container(spec, cancel.clone()).await {
            Ok(id) => id,
            Err(e) if is_image_missing(&e) => {
                tracing::info!(target: "docker", "Pulling image {}", spec.image);
                self.pull_image(&spec.image, cancel.clone())
                    .await
                    .context("image pull failed")?;
                self.create_container(spec, cancel.clone()).await?
            }
            Err(e) => return Err(e),
        };

        let started = async {
            self.connect_extra_networks(spec, &container_id, cancel.clone())
                .await?;
            self.start_container(&container_id, cancel).await
        }
        .await;

        // The handle never reaches the caller on this path, so nothing
        // downstream can clean the container up. Remove it here, with a
        // fresh token in case cancellation is what got us here.
        if let Err(e) = started {
            let args = vec![
                "rm".to_string(),
                "--force".to_string(),
                container_id.clone(),
            ];
            let _ = self.run_docker(&args, None, CancellationToken::new()).await;
            return Err(e);
        }

        tracing::info!(
            target: "docker",
            step_key = %spec.step_key,
            "Container started: {}",
            &container_id[..12.min(container_id.len())]
        );

        Ok(ContainerHandle {
            id: container_id,
            name: spec.container_name.clone(),
            step_key: spec.step_key.clone(),
        })
    }

    async fn inspect(
        &self,
        handle: &ContainerHandle,
        cancel: CancellationToken,
    ) -> Result<ContainerState> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .State}}".to_string(),
            handle.id.clone(),
        ];

        let output = match self.run_docker(&args, None, cancel).await {
            Ok(output) => output,
            Err(e) if format!("{:#}", e).contains("No such object") => {
                return Ok(ContainerState::NotFound);
            }
            Err(e) => return Err(e),
        };

        let state: InspectedState =
            serde_json::from_str(output.trim()).context("unparseable inspect output")?;

        match state.status.as_str() {
            "exited" | "dead" => Ok(ContainerState::Exited(state.exit_code)),
            "removing" => Ok(ContainerState::NotFound),
            _ => Ok(ContainerState::Running),
        }
    }

    async fn stop(&self, handle: &ContainerHandle, cancel: CancellationToken) -> Result<()> {
        let args = vec!["stop".to_string(), handle.id.clone()];
        self.run_docker(&args, None, cancel).await?;
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle, cancel: CancellationToken) -> Result<()> {
        let args = vec!["rm".to_string(), "--force".to_string(), handle.id.clone()];
        self.run_docker(&args, None, cancel).await?;
        Ok(())
    }
}

fn is_image_missing(e: &anyhow::Error) -> bool {
    let message = format!("{:#}", e);
    message.contains("No such image") || message.contains("Unable to find image")
}

/// Translate pass-through container options into CLI flags.
/// `{cpus: "0.5"}` becomes `--cpus 0.5`, boolean `true` becomes a bare
/// flag, sequences repeat the flag per element.
fn build_kwargs_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in &spec.container_kwargs {
        let flag = format!("--{}", key.replace('_', "-"));
        match value {
            Value::Bool(true) => args.push(flag),
            Value::Bool(false) => {}
            Value::Sequence(items) => {
                for item in items {
                    args.push(flag.clone());
                    args.push(scalar_to_string(item));
                }
            }
            other => {
                args.push(flag);
                args.push(scalar_to_string(other));
            }
        }
    }
    args
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec_with_kwargs(kwargs: BTreeMap<String, Value>) -> LaunchSpec {
        LaunchSpec {
            step_key: "load".to_string(),
            run_id: "run-1".to_string(),
            container_name: "flowline-step-load-abc123".to_string(),
            image: "flowline/test:latest".to_string(),
            command: vec!["execute-step".to_string(), "load".to_string()],
            env: Vec::new(),
            networks: Vec::new(),
            registry: None,
            container_kwargs: kwargs,
        }
    }

    #[test]
    fn test_docker_cli_paths() {
        assert_eq!(DockerCli::new().docker_path, "docker");
        assert_eq!(
            DockerCli::with_path("/usr/local/bin/docker").docker_path,
            "/usr/local/bin/docker"
        );
    }

    #[test]
    fn test_kwargs_scalar_and_bool_flags() {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("cpus".to_string(), Value::String("0.5".to_string()));
        kwargs.insert("privileged".to_string(), Value::Bool(true));
        kwargs.insert("read_only".to_string(), Value::Bool(false));

        let args = build_kwargs_args(&spec_with_kwargs(kwargs));
        assert_eq!(args, vec!["--cpus", "0.5", "--privileged"]);
    }

    #[test]
    fn test_kwargs_sequence_repeats_flag() {
        let mut kwargs = BTreeMap::new();
        kwargs.insert(
            "volume".to_string(),
            Value::Sequence(vec![
                Value::String("/a:/a".to_string()),
                Value::String("/b:/b".to_string()),
            ]),
        );

        let args = build_kwargs_args(&spec_with_kwargs(kwargs));
        assert_eq!(args, vec!["--volume", "/a:/a", "--volume", "/b:/b"]);
    }

    // Stub docker binary: logs every invocation, `create` prints an id,
    // `start` fails. Lets the error-path cleanup be asserted without a
    // daemon.
    #[tokio::test]
    async fn test_failed_start_removes_created_container() {
        use std::os::unix::fs::PermissionsExt;

        let tag = uuid::Uuid::new_v4().simple().to_string();
        let script = std::env::temp_dir().join(format!("stub-docker-{}", tag));
        let log = std::env::temp_dir().join(format!("stub-docker-{}.log", tag));

        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" >> {log}\ncase \"$1\" in\n  create) echo cid-123 ;;\n  start) echo boom >&2; exit 1 ;;\nesac\n",
                log = log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = DockerCli::with_path(script.to_string_lossy().into_owned());
        let err = cli
            .create_and_start(&spec_with_kwargs(BTreeMap::new()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("start"));

        let calls = std::fs::read_to_string(&log).unwrap();
        assert!(calls.contains("start cid-123"));
        assert!(calls.contains("rm --force cid-123"));

        let _ = std::fs::remove_file(&script);
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn test_inspect_state_parsing() {
        let state: InspectedState =
            serde_json::from_str(r#"{"Status":"exited","Running":false,"ExitCode":137}"#).unwrap();
        assert_eq!(state.status, "exited");
        assert_eq!(state.exit_code, 137);
    }
}
