// flowline-common: shared model for the Flowline container step executor.
// Holds the step/outcome/event model, run configuration, and error taxonomy
// consumed by executor backends.

pub mod errors;
pub mod events;
pub mod logging;
pub mod run_config;
pub mod step;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use errors::ExecutorError;
pub use events::{EventReporter, InMemoryReporter, LogReporter, StepEvent, StepEventKind};
pub use run_config::{DockerExecutorConfig, RegistrySpec, RunConfig};
pub use step::{FailureReason, StepDescriptor, StepOutcome};
