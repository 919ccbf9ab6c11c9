// Scripted in-memory container runtime for coordinator / monitor / plan
// tests. No docker daemon involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use flowline_common::RegistrySpec;

use crate::launch_spec::LaunchSpec;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerState};

/// What a fake container does after it is "started".
#[derive(Debug, Clone)]
pub enum StepBehavior {
    /// Report running for `polls` inspections, then exit with `code`.
    ExitAfter { polls: u32, code: i64 },

    /// Report running for `polls` inspections, then disappear — the
    /// external-kill / segfault-teardown case.
    VanishAfter { polls: u32 },

    /// Never reach a terminal state.
    RunForever,

    /// Fail at create/start time.
    FailLaunch(String),

    /// Block in create until the token fires, then fail the way a killed
    /// CLI invocation does.
    LaunchBlocksUntilCancelled,

    /// Fail the first `failures` inspections, then exit with `code`.
    FlakyInspectThenExit { failures: u32, code: i64 },

    /// Every inspection fails.
    AlwaysFailInspect,
}

#[derive(Default)]
pub struct FakeRuntime {
    behaviors: Mutex<HashMap<String, StepBehavior>>,
    polls: Mutex<HashMap<String, u32>>,
    inspect_failures: Mutex<HashMap<String, u32>>,
    next_id: AtomicU64,

    pub created: Mutex<Vec<LaunchSpec>>,
    pub logins: Mutex<Vec<RegistrySpec>>,
    pub stopped: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub launch_attempts: Mutex<HashMap<String, u32>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behavior of the container launched for `step_key`.
    /// Unscripted steps exit 0 on first inspection.
    pub fn behave(&self, step_key: &str, behavior: StepBehavior) {
        self.behaviors.lock().insert(step_key.to_string(), behavior);
    }

    pub fn create_count_for(&self, step_key: &str) -> usize {
        self.created
            .lock()
            .iter()
            .filter(|s| s.step_key == step_key)
            .count()
    }

    fn behavior_for(&self, step_key: &str) -> StepBehavior {
        self.behaviors
            .lock()
            .get(step_key)
            .cloned()
            .unwrap_or(StepBehavior::ExitAfter { polls: 0, code: 0 })
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn login(&self, registry: &RegistrySpec, _cancel: CancellationToken) -> Result<()> {
        self.logins.lock().push(registry.clone());
        Ok(())
    }

    async fn create_and_start(
        &self,
        spec: &LaunchSpec,
        cancel: CancellationToken,
    ) -> Result<ContainerHandle> {
        *self
            .launch_attempts
            .lock()
            .entry(spec.step_key.clone())
            .or_insert(0) += 1;

        match self.behavior_for(&spec.step_key) {
            StepBehavior::FailLaunch(detail) => bail!("{}", detail),
            StepBehavior::LaunchBlocksUntilCancelled => {
                cancel.cancelled().await;
                bail!("docker create cancelled");
            }
            _ => {}
        }

        self.created.lock().push(spec.clone());
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(ContainerHandle {
            id,
            name: spec.container_name.clone(),
            step_key: spec.step_key.clone(),
        })
    }

    async fn inspect(
        &self,
        handle: &ContainerHandle,
        _cancel: CancellationToken,
    ) -> Result<ContainerState> {
        match self.behavior_for(&handle.step_key) {
            StepBehavior::ExitAfter { polls, code } => {
                let mut counts = self.polls.lock();
                let count = counts.entry(handle.id.clone()).or_insert(0);
                *count += 1;
                if *count > polls {
                    Ok(ContainerState::Exited(code))
                } else {
                    Ok(ContainerState::Running)
                }
            }
            StepBehavior::VanishAfter { polls } => {
                let mut counts = self.polls.lock();
                let count = counts.entry(handle.id.clone()).or_insert(0);
                *count += 1;
                if *count > polls {
                    Ok(ContainerState::NotFound)
                } else {
                    Ok(ContainerState::Running)
                }
            }
            StepBehavior::RunForever => Ok(ContainerState::Running),
            StepBehavior::FailLaunch(_) | StepBehavior::LaunchBlocksUntilCancelled => {
                Ok(ContainerState::NotFound)
            }
            StepBehavior::FlakyInspectThenExit { failures, code } => {
                let mut counts = self.inspect_failures.lock();
                let count = counts.entry(handle.id.clone()).or_insert(0);
                if *count < failures {
                    *count += 1;
                    bail!("transient daemon error");
                }
                Ok(ContainerState::Exited(code))
            }
            StepBehavior::AlwaysFailInspect => bail!("daemon unreachable"),
        }
    }

    async fn stop(&self, handle: &ContainerHandle, _cancel: CancellationToken) -> Result<()> {
        self.stopped.lock().push(handle.id.clone());
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle, _cancel: CancellationToken) -> Result<()> {
        self.removed.lock().push(handle.id.clone());
        Ok(())
    }
}
