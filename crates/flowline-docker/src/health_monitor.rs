// Health monitor: polls a container handle until it reaches a terminal
// state. An abrupt container crash surfaces here as an explicit
// `Failure(Vanished)` outcome rather than an error bubbling out of the
// poll loop, so it is observed and reported exactly once.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use flowline_common::{FailureReason, StepOutcome};

use crate::launcher::ContainerLauncher;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerState};

/// Watches one running container to its terminal state.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    /// Delay between state inspections.
    pub poll_interval: Duration,

    /// Wall-clock bound on the whole step. Exceeding it terminates the
    /// container and fails the step.
    pub timeout: Duration,

    /// Consecutive inspection failures tolerated before the container is
    /// declared vanished.
    pub max_inspect_failures: u32,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(60 * 60),
            max_inspect_failures: 5,
        }
    }
}

impl HealthMonitor {
    /// Poll until the container reaches a terminal state.
    ///
    /// Exit 0 is `Success`; non-zero exit, disappearance, exhausted
    /// inspection retries, timeout, and cancellation each map to the
    /// corresponding `Failure` reason. Transient inspection errors count
    /// as "still running" until the retry budget runs out.
    pub async fn await_terminal(
        &self,
        runtime: &dyn ContainerRuntime,
        handle: &ContainerHandle,
        cancel: CancellationToken,
    ) -> StepOutcome {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return StepOutcome::Failure(FailureReason::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::error!(
                    target: "monitor",
                    step_key = %handle.step_key,
                    "Step exceeded timeout of {:?}; terminating container {}",
                    self.timeout,
                    handle.name
                );
                // The container is now orphaned; take it down before failing.
                ContainerLauncher::terminate(runtime, handle).await;
                return StepOutcome::Failure(FailureReason::Timeout(self.timeout.as_secs()));
            }

            match runtime.inspect(handle, cancel.clone()).await {
                Ok(ContainerState::Exited(0)) => return StepOutcome::Success,
                Ok(ContainerState::Exited(code)) => {
                    return StepOutcome::Failure(FailureReason::NonZeroExit(code));
                }
                Ok(ContainerState::NotFound) => {
                    return StepOutcome::Failure(FailureReason::Vanished(format!(
                        "container {} no longer exists",
                        handle.name
                    )));
                }
                Ok(ContainerState::Running) => {
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        target: "monitor",
                        step_key = %handle.step_key,
                        "Inspection of container {} failed ({}/{}): {:#}",
                        handle.name,
                        consecutive_failures,
                        self.max_inspect_failures,
                        e
                    );
                    if consecutive_failures >= self.max_inspect_failures {
                        return StepOutcome::Failure(FailureReason::Vanished(format!(
                            "container {} unresolvable after {} inspection failures",
                            handle.name, consecutive_failures
                        )));
                    }
                }
            }
        }
    }
}
