// Launch spec building: turn a step, its resolved container context, and
// the host environment into one concrete container invocation descriptor.
// Pure construction; the host environment is an explicit input so tests can
// inject fake environments.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde_yaml::Value;
use uuid::Uuid;

use flowline_common::{ExecutorError, RegistrySpec, StepDescriptor};

use crate::container_context::ContainerContext;

/// Fully resolved container invocation descriptor for one step-attempt.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub step_key: String,
    pub run_id: String,

    /// Unique container name for this attempt.
    pub container_name: String,

    /// Resolved image reference.
    pub image: String,

    /// Command to run inside the container; encodes which step to run.
    pub command: Vec<String>,

    /// Resolved environment: forwarded host values first, then
    /// step-specific pairs.
    pub env: Vec<(String, String)>,

    /// Networks to attach, in order.
    pub networks: Vec<String>,

    /// Registry credentials, when the image needs authenticated pulls.
    pub registry: Option<RegistrySpec>,

    /// Extra container create options passed through to the runtime.
    pub container_kwargs: BTreeMap<String, Value>,
}

/// Builds a `LaunchSpec` per step-attempt.
pub struct LaunchSpecBuilder;

impl LaunchSpecBuilder {
    /// Resolve a concrete launch spec.
    ///
    /// The image comes from the step when it carries one, otherwise from
    /// the container context; no image anywhere is an
    /// `ImageResolutionError`. Each name in `context.env_vars` is read from
    /// `host_env` and forwarded if present, silently omitted if absent.
    pub fn build(
        step: &StepDescriptor,
        context: &ContainerContext,
        host_env: &HashMap<String, String>,
    ) -> Result<LaunchSpec, ExecutorError> {
        let image = step
            .image
            .clone()
            .or_else(|| context.image.clone())
            .ok_or_else(|| {
                ExecutorError::ImageResolution(format!(
                    "no image reference for step {}",
                    step.step_key
                ))
            })?;

        let command = if step.args.is_empty() {
            vec![
                "execute-step".to_string(),
                step.step_key.clone(),
                "--run-id".to_string(),
                step.run_id.clone(),
            ]
        } else {
            step.args.clone()
        };

        let mut env: Vec<(String, String)> = Vec::new();
        for name in &context.env_vars {
            if let Some(value) = host_env.get(name) {
                env.push((name.clone(), value.clone()));
            }
        }
        env.extend(step.env.iter().cloned());

        Ok(LaunchSpec {
            step_key: step.step_key.clone(),
            run_id: step.run_id.clone(),
            container_name: container_name(&step.step_key),
            image,
            command,
            env,
            networks: context.networks.iter().cloned().collect(),
            registry: context.registry.clone(),
            container_kwargs: context.container_kwargs.clone(),
        })
    }
}

/// Snapshot the real process environment for forwarding. Call sites pass
/// the snapshot into `build` instead of reading globals there.
pub fn host_env_snapshot() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Container names must be unique per attempt and docker-safe.
fn container_name(step_key: &str) -> String {
    let sanitized: String = step_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("flowline-step-{}-{}", sanitized, &suffix[..8])
}
