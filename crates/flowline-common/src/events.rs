// Step event records and the reporter seam to the instance store.
// The reporter carries no business logic: it forwards start/success/failure
// records and must be safe to call more than once with the same outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::step::StepOutcome;

/// Kind of step event, mirroring the step lifecycle the instance store
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepEventKind {
    Started,
    Succeeded,
    Failed,
}

/// A single step lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub run_id: String,
    pub step_key: String,
    pub kind: StepEventKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl StepEvent {
    pub fn started(run_id: &str, step_key: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_key: step_key.to_string(),
            kind: StepEventKind::Started,
            timestamp: Utc::now(),
            message: format!("Step {} starting in container", step_key),
        }
    }

    pub fn terminal(run_id: &str, step_key: &str, outcome: &StepOutcome) -> Self {
        let (kind, message) = match outcome {
            StepOutcome::Success => (
                StepEventKind::Succeeded,
                format!("Step {} succeeded", step_key),
            ),
            StepOutcome::Failure(reason) => (
                StepEventKind::Failed,
                format!("Step {} failed: {}", step_key, reason),
            ),
        };
        Self {
            run_id: run_id.to_string(),
            step_key: step_key.to_string(),
            kind,
            timestamp: Utc::now(),
            message,
        }
    }
}

/// Sink for step events, backed by the external instance store.
///
/// `report` completes before control returns to the caller, so a step's
/// terminal record is always durable before any dependent step is released.
#[async_trait]
pub trait EventReporter: Send + Sync {
    async fn report(&self, event: StepEvent);
}

/// Reporter that emits events as structured log lines.
pub struct LogReporter;

#[async_trait]
impl EventReporter for LogReporter {
    async fn report(&self, event: StepEvent) {
        match event.kind {
            StepEventKind::Started | StepEventKind::Succeeded => {
                tracing::info!(
                    target: "executor",
                    run_id = %event.run_id,
                    step_key = %event.step_key,
                    "{}",
                    event.message
                );
            }
            StepEventKind::Failed => {
                tracing::error!(
                    target: "executor",
                    run_id = %event.run_id,
                    step_key = %event.step_key,
                    "{}",
                    event.message
                );
            }
        }
    }
}

/// Reporter that collects events in memory. Used by tests and by embedders
/// that flush records to the instance store in batches.
#[derive(Default)]
pub struct InMemoryReporter {
    events: Mutex<Vec<StepEvent>>,
}

impl InMemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().clone()
    }

    /// Event kinds recorded for one step, in report order.
    pub fn kinds_for(&self, step_key: &str) -> Vec<StepEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.step_key == step_key)
            .map(|e| e.kind)
            .collect()
    }
}

#[async_trait]
impl EventReporter for InMemoryReporter {
    async fn report(&self, event: StepEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::FailureReason;

    #[tokio::test]
    async fn test_in_memory_reporter_preserves_order() {
        let reporter = InMemoryReporter::new();
        reporter.report(StepEvent::started("run-1", "load")).await;
        reporter
            .report(StepEvent::terminal("run-1", "load", &StepOutcome::Success))
            .await;

        assert_eq!(
            reporter.kinds_for("load"),
            vec![StepEventKind::Started, StepEventKind::Succeeded]
        );
    }

    #[test]
    fn test_terminal_event_carries_failure_detail() {
        let outcome = StepOutcome::Failure(FailureReason::Vanished("killed externally".into()));
        let event = StepEvent::terminal("run-1", "transform", &outcome);
        assert_eq!(event.kind, StepEventKind::Failed);
        assert!(event.message.contains("killed externally"));
    }
}
