// Container runtime seam. The coordinator, launcher, and health monitor
// only ever talk to a `ContainerRuntime`; the docker CLI wrapper is the
// production implementation, tests inject fakes.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use flowline_common::RegistrySpec;

use crate::launch_spec::LaunchSpec;

/// Opaque reference to a created container. Owned exclusively by the
/// coordinator for the duration of one step-attempt; the container is
/// removed once a terminal state has been observed and reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Container ID assigned by the runtime.
    pub id: String,

    /// Container name from the launch spec.
    pub name: String,

    /// Step this container runs.
    pub step_key: String,
}

/// Observed state of a container at inspection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Created or running; not yet terminal.
    Running,

    /// Exited with the given code.
    Exited(i64),

    /// The handle no longer resolves to a container. Either it was never
    /// created or an external agent removed it.
    NotFound,
}

/// Operations the executor needs from a container runtime.
///
/// `create_and_start` is at-most-once per call; a failed launch is never
/// silently retried inside the runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Authenticate against an image registry.
    async fn login(&self, registry: &RegistrySpec, cancel: CancellationToken) -> Result<()>;

    /// Create a container from the spec and start it. Returns a handle to
    /// the now-running container.
    async fn create_and_start(
        &self,
        spec: &LaunchSpec,
        cancel: CancellationToken,
    ) -> Result<ContainerHandle>;

    /// Query the container's current state.
    async fn inspect(
        &self,
        handle: &ContainerHandle,
        cancel: CancellationToken,
    ) -> Result<ContainerState>;

    /// Stop a running container.
    async fn stop(&self, handle: &ContainerHandle, cancel: CancellationToken) -> Result<()>;

    /// Remove a container, running or not.
    async fn remove(&self, handle: &ContainerHandle, cancel: CancellationToken) -> Result<()>;
}
