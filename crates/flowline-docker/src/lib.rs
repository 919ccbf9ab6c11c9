// flowline-docker: runs each pipeline step as an isolated docker container.
//
// Architecture:
//   run_plan → StepCoordinator::execute_step
//     → ContainerContext::resolve → LaunchSpecBuilder::build
//     → ContainerLauncher::launch → HealthMonitor::await_terminal
//     → EventReporter::report

pub mod container_context;
pub mod coordinator;
pub mod docker_cli;
pub mod health_monitor;
pub mod launch_spec;
pub mod launcher;
pub mod plan;
pub mod runtime;

#[cfg(test)]
pub(crate) mod test_support;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use container_context::ContainerContext;
pub use coordinator::{StepCoordinator, StepState, StepStateMachine};
pub use docker_cli::DockerCli;
pub use health_monitor::HealthMonitor;
pub use launch_spec::{host_env_snapshot, LaunchSpec, LaunchSpecBuilder};
pub use launcher::ContainerLauncher;
pub use plan::{run_plan, ExecutionPlan, PlanResult};
pub use runtime::{ContainerHandle, ContainerRuntime, ContainerState};
