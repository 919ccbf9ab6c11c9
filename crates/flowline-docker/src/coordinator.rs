// Step execution coordinator: drives one step-attempt through
// Pending → ContextResolved → Launching → Running → Terminal, owning the
// container handle for the attempt's whole lifetime. `execute_step` always
// returns a StepOutcome; every error kind becomes a terminal failure.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use flowline_common::{
    DockerExecutorConfig, EventReporter, ExecutorError, FailureReason, RunConfig, StepDescriptor,
    StepEvent, StepOutcome,
};

use crate::container_context::ContainerContext;
use crate::health_monitor::HealthMonitor;
use crate::launch_spec::LaunchSpecBuilder;
use crate::launcher::ContainerLauncher;
use crate::runtime::ContainerRuntime;

/// Lifecycle state of one step-attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StepState {
    Pending,
    ContextResolved,
    Launching,
    Running,
    Terminal(StepOutcome),
}

impl StepState {
    /// Legal transition edges. Any non-terminal state may fail straight to
    /// `Terminal`; terminal states never transition again.
    pub fn can_transition_to(&self, next: &StepState) -> bool {
        match (self, next) {
            (StepState::Terminal(_), _) => false,
            (_, StepState::Terminal(_)) => true,
            (StepState::Pending, StepState::ContextResolved) => true,
            (StepState::ContextResolved, StepState::Launching) => true,
            (StepState::Launching, StepState::Running) => true,
            _ => false,
        }
    }
}

/// Tracks the state of one step-attempt and refuses illegal transitions.
pub struct StepStateMachine {
    step_key: String,
    state: StepState,
}

impl StepStateMachine {
    pub fn new(step_key: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            state: StepState::Pending,
        }
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    /// Advance to `next`. Illegal transitions are refused and reported;
    /// the state is left unchanged. `Launching` is reachable only once per
    /// attempt, so a second container can never be started for it.
    pub fn advance(&mut self, next: StepState) -> bool {
        if !self.state.can_transition_to(&next) {
            tracing::error!(
                target: "executor",
                step_key = %self.step_key,
                "Refusing illegal transition {:?} -> {:?}",
                self.state,
                next
            );
            return false;
        }
        self.state = next;
        true
    }
}

/// Executes single pipeline steps as isolated containers.
pub struct StepCoordinator {
    runtime: Arc<dyn ContainerRuntime>,
    reporter: Arc<dyn EventReporter>,
    monitor: HealthMonitor,
    container_context_override: Option<DockerExecutorConfig>,
}

impl StepCoordinator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, reporter: Arc<dyn EventReporter>) -> Self {
        Self {
            runtime,
            reporter,
            monitor: HealthMonitor::default(),
            container_context_override: None,
        }
    }

    /// Replace the default health-monitor settings.
    pub fn with_monitor(mut self, monitor: HealthMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Supply a per-target container-context override, merged field-by-field
    /// over the run configuration's executor section.
    pub fn with_container_context(mut self, context: DockerExecutorConfig) -> Self {
        self.container_context_override = Some(context);
        self
    }

    /// Execute one step to its terminal state: resolve the container
    /// context, build a launch spec, launch, monitor, clean up the
    /// container, and report the outcome. Blocking until terminal; never
    /// returns an error past this boundary.
    pub async fn execute_step(
        &self,
        step: &StepDescriptor,
        run_config: &RunConfig,
        host_env: &HashMap<String, String>,
        cancel: CancellationToken,
    ) -> StepOutcome {
        self.reporter
            .report(StepEvent::started(&step.run_id, &step.step_key))
            .await;

        let mut machine = StepStateMachine::new(&step.step_key);
        let outcome = match self
            .run_attempt(step, run_config, host_env, &mut machine, cancel.clone())
            .await
        {
            Ok(outcome) => outcome,
            // A run-level abort surfaces as an error from whatever operation
            // was in flight (a killed CLI invocation, an aborted login).
            // That is a cancellation, not a fault of the operation itself.
            Err(_) if cancel.is_cancelled() => StepOutcome::Failure(FailureReason::Cancelled),
            Err(e) => StepOutcome::Failure(e.into_failure_reason()),
        };

        machine.advance(StepState::Terminal(outcome.clone()));

        self.reporter
            .report(StepEvent::terminal(&step.run_id, &step.step_key, &outcome))
            .await;

        outcome
    }

    async fn run_attempt(
        &self,
        step: &StepDescriptor,
        run_config: &RunConfig,
        host_env: &HashMap<String, String>,
        machine: &mut StepStateMachine,
        cancel: CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        if cancel.is_cancelled() {
            return Ok(StepOutcome::Failure(FailureReason::Cancelled));
        }

        let executor_config = run_config.executor_config()?;
        let context =
            ContainerContext::resolve(&executor_config, self.container_context_override.as_ref())?;
        machine.advance(StepState::ContextResolved);

        let spec = LaunchSpecBuilder::build(step, &context, host_env)?;

        machine.advance(StepState::Launching);
        let handle = ContainerLauncher::launch(self.runtime.as_ref(), &spec, cancel.clone()).await?;
        machine.advance(StepState::Running);

        tracing::info!(
            target: "executor",
            run_id = %step.run_id,
            step_key = %step.step_key,
            "Monitoring container {} for step",
            handle.name
        );

        // Scoped acquisition: whatever the monitor concludes (success,
        // crash, timeout, cancellation), the container is taken down before
        // the outcome leaves this function.
        let outcome = self
            .monitor
            .await_terminal(self.runtime.as_ref(), &handle, cancel)
            .await;

        ContainerLauncher::terminate(self.runtime.as_ref(), &handle).await;

        Ok(outcome)
    }
}
