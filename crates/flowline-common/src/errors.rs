// Error taxonomy for the docker executor.
// Every variant converts to a terminal FailureReason at the coordinator
// boundary; nothing propagates past `execute_step` as an Err.

use thiserror::Error;

use crate::step::FailureReason;

/// Errors raised by executor components before a container reaches a
/// terminal state on its own.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Malformed executor or container-context configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No usable image reference for the step.
    #[error("image resolution error: {0}")]
    ImageResolution(String),

    /// Container create/start failed (daemon, image pull, network).
    #[error("launch error: {0}")]
    Launch(String),
}

impl ExecutorError {
    /// Map this error to the terminal failure reason recorded on the step.
    pub fn into_failure_reason(self) -> FailureReason {
        match self {
            ExecutorError::Configuration(detail) => FailureReason::Configuration(detail),
            ExecutorError::ImageResolution(detail) => FailureReason::ImageResolution(detail),
            ExecutorError::Launch(detail) => FailureReason::Launch(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_maps_to_failure_reason() {
        let reason = ExecutorError::Configuration("registry missing password".into())
            .into_failure_reason();
        assert_eq!(
            reason,
            FailureReason::Configuration("registry missing password".into())
        );

        let reason = ExecutorError::Launch("daemon unavailable".into()).into_failure_reason();
        assert_eq!(reason, FailureReason::Launch("daemon unavailable".into()));
    }
}
