// Container launcher: one launch spec in, one running container handle out.
// At-most-once per call; a fresh attempt requires a fresh spec from the
// coordinator.

use tokio_util::sync::CancellationToken;

use flowline_common::ExecutorError;

use crate::launch_spec::LaunchSpec;
use crate::runtime::{ContainerHandle, ContainerRuntime};

pub struct ContainerLauncher;

impl ContainerLauncher {
    /// Launch a container for the spec: authenticate against the registry
    /// when credentials are present, then create and start. Any failure is
    /// a terminal `LaunchError`; nothing is retried here.
    pub async fn launch(
        runtime: &dyn ContainerRuntime,
        spec: &LaunchSpec,
        cancel: CancellationToken,
    ) -> Result<ContainerHandle, ExecutorError> {
        if let Some(ref registry) = spec.registry {
            runtime
                .login(registry, cancel.clone())
                .await
                .map_err(|e| ExecutorError::Launch(format!("registry login failed: {:#}", e)))?;
        }

        runtime
            .create_and_start(spec, cancel)
            .await
            .map_err(|e| ExecutorError::Launch(format!("{:#}", e)))
    }

    /// Stop and remove a container. Runs on every exit path, including
    /// cancellation and monitor timeout, so errors are logged and swallowed
    /// rather than allowed to mask the step outcome. Uses a fresh token:
    /// cleanup must still run while the run-level token is cancelled.
    pub async fn terminate(runtime: &dyn ContainerRuntime, handle: &ContainerHandle) {
        let cleanup_token = CancellationToken::new();

        if let Err(e) = runtime.stop(handle, cleanup_token.clone()).await {
            tracing::debug!(
                target: "docker",
                step_key = %handle.step_key,
                "Stop of container {} failed (may already be gone): {:#}",
                handle.name,
                e
            );
        }

        if let Err(e) = runtime.remove(handle, cleanup_token).await {
            tracing::warn!(
                target: "docker",
                step_key = %handle.step_key,
                "Failed to remove container {}: {:#}",
                handle.name,
                e
            );
        }
    }
}
