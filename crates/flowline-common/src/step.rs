// Step model: what a single schedulable unit of pipeline work looks like,
// and the terminal outcome it produces.

use serde::{Deserialize, Serialize};

/// A single unit of pipeline work, executed as one container invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Unique key of the step within the plan (e.g. "multiply_the_word").
    pub step_key: String,

    /// The pipeline run this step belongs to.
    pub run_id: String,

    /// Image reference for this step, when the step carries its own.
    /// Falls back to the run-level image when `None`.
    pub image: Option<String>,

    /// Argument vector expressing "run this logical step" inside the
    /// container. Appended after the image in the container command.
    pub args: Vec<String>,

    /// Step-specific environment pairs, applied after forwarded host vars.
    pub env: Vec<(String, String)>,
}

impl StepDescriptor {
    pub fn new(step_key: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            run_id: run_id.into(),
            image: None,
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Bad executor / container-context configuration. Non-retryable.
    Configuration(String),

    /// No image reference could be resolved for the step. Non-retryable.
    ImageResolution(String),

    /// The container could not be created or started (daemon unavailable,
    /// pull failure, bad network). Retries, if any, are scheduler policy.
    Launch(String),

    /// The step process ran and exited non-zero. Expected business failure.
    NonZeroExit(i64),

    /// The container disappeared or was killed by an agent outside this
    /// system's control (OOM kill, external `docker rm`, segfault teardown).
    Vanished(String),

    /// The health check exceeded its wall-clock bound.
    Timeout(u64),

    /// The run was aborted while the step was in flight.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Configuration(detail) => write!(f, "configuration error: {}", detail),
            FailureReason::ImageResolution(detail) => {
                write!(f, "image resolution error: {}", detail)
            }
            FailureReason::Launch(detail) => write!(f, "launch error: {}", detail),
            FailureReason::NonZeroExit(code) => {
                write!(f, "container exited with non-zero code {}", code)
            }
            FailureReason::Vanished(detail) => write!(f, "container vanished: {}", detail),
            FailureReason::Timeout(secs) => {
                write!(f, "step exceeded health-check timeout of {}s", secs)
            }
            FailureReason::Cancelled => write!(f, "step cancelled"),
        }
    }
}

/// Terminal result of one step-attempt. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failure(FailureReason),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }

    /// The failure reason, if this outcome is a failure.
    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            StepOutcome::Success => None,
            StepOutcome::Failure(reason) => Some(reason),
        }
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Success => write!(f, "success"),
            StepOutcome::Failure(reason) => write!(f, "failure ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_descriptor_builder() {
        let step = StepDescriptor::new("multiply_the_word", "run-1")
            .with_image("flowline/test:latest")
            .with_args(vec!["execute_step".to_string(), "multiply_the_word".to_string()]);

        assert_eq!(step.step_key, "multiply_the_word");
        assert_eq!(step.image.as_deref(), Some("flowline/test:latest"));
        assert_eq!(step.args.len(), 2);
    }

    #[test]
    fn test_outcome_success() {
        assert!(StepOutcome::Success.is_success());
        assert!(StepOutcome::Success.failure_reason().is_none());
    }

    #[test]
    fn test_outcome_failure_display() {
        let outcome = StepOutcome::Failure(FailureReason::NonZeroExit(137));
        assert!(!outcome.is_success());
        assert!(outcome.to_string().contains("137"));
    }
}
