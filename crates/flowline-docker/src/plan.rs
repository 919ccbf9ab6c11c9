// Plan runner: releases steps whose upstream dependencies succeeded, runs
// released steps concurrently through the coordinator, and skips the
// dependents of failed steps. The generic scheduling engine stays external;
// this is the docker-specific driver a scheduler loop would embed.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use flowline_common::{FailureReason, RunConfig, StepDescriptor, StepOutcome};

use crate::coordinator::StepCoordinator;

/// A resolved list of steps with their dependency edges.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    steps: Vec<StepDescriptor>,
    deps: HashMap<String, Vec<String>>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step depending on the given upstream step keys.
    pub fn add_step(&mut self, step: StepDescriptor, deps: &[&str]) {
        self.deps.insert(
            step.step_key.clone(),
            deps.iter().map(|d| d.to_string()).collect(),
        );
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Outcome of one plan execution.
#[derive(Debug)]
pub struct PlanResult {
    /// True only when every step executed and succeeded.
    pub success: bool,

    /// Terminal outcomes of the steps that executed.
    pub outcomes: HashMap<String, StepOutcome>,

    /// Steps never executed because an upstream step failed.
    pub skipped: Vec<String>,
}

/// Run a plan to completion. Steps whose dependencies are all satisfied run
/// concurrently; a step's terminal outcome is fully reported before any of
/// its dependents is released.
pub async fn run_plan(
    coordinator: Arc<StepCoordinator>,
    plan: &ExecutionPlan,
    run_config: Arc<RunConfig>,
    host_env: Arc<HashMap<String, String>>,
    cancel: CancellationToken,
) -> PlanResult {
    let outcomes: DashMap<String, StepOutcome> = DashMap::new();
    let mut pending: Vec<StepDescriptor> = plan.steps.clone();
    let mut skipped: Vec<String> = Vec::new();
    let mut join_set: JoinSet<(String, StepOutcome)> = JoinSet::new();

    let retry_launch = run_config
        .executor_config()
        .ok()
        .and_then(|c| c.retry_on_launch_failure)
        .unwrap_or(false);

    loop {
        // Release ready steps, skip those with a failed or skipped upstream.
        let mut still_pending = Vec::new();
        for step in pending.drain(..) {
            let deps = plan.deps.get(&step.step_key).cloned().unwrap_or_default();

            let upstream_failed = deps.iter().any(|d| {
                skipped.contains(d)
                    || outcomes
                        .get(d)
                        .map(|o| !o.is_success())
                        .unwrap_or(false)
            });
            if upstream_failed {
                tracing::info!(
                    target: "executor",
                    step_key = %step.step_key,
                    "Skipping step: upstream dependency failed"
                );
                skipped.push(step.step_key.clone());
                continue;
            }

            let ready = deps
                .iter()
                .all(|d| outcomes.get(d).map(|o| o.is_success()).unwrap_or(false));
            if !ready {
                still_pending.push(step);
                continue;
            }

            let coordinator = Arc::clone(&coordinator);
            let run_config = Arc::clone(&run_config);
            let host_env = Arc::clone(&host_env);
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let mut outcome = coordinator
                    .execute_step(&step, &run_config, &host_env, cancel.clone())
                    .await;

                // Launch failures may be retried once when the run config
                // opts in; the retry is a fresh call with a fresh spec.
                if retry_launch
                    && matches!(outcome, StepOutcome::Failure(FailureReason::Launch(_)))
                {
                    tracing::info!(
                        target: "executor",
                        step_key = %step.step_key,
                        "Retrying step after launch failure"
                    );
                    outcome = coordinator
                        .execute_step(&step, &run_config, &host_env, cancel)
                        .await;
                }

                (step.step_key.clone(), outcome)
            });
        }
        pending = still_pending;

        // Nothing in flight: remaining pending steps can never be released.
        if join_set.is_empty() {
            break;
        }

        match join_set.join_next().await {
            Some(Ok((step_key, outcome))) => {
                outcomes.insert(step_key, outcome);
            }
            Some(Err(e)) => {
                tracing::error!(target: "executor", "Step task failed to join: {:#}", e);
            }
            None => {}
        }
    }

    // Steps left pending here have an unsatisfiable dependency set.
    for step in pending {
        skipped.push(step.step_key);
    }

    let outcomes: HashMap<String, StepOutcome> = outcomes.into_iter().collect();

    let success = skipped.is_empty()
        && outcomes.len() == plan.steps.len()
        && outcomes.values().all(|o| o.is_success());

    PlanResult {
        success,
        outcomes,
        skipped,
    }
}
