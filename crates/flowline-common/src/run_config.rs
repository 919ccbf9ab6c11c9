// Run configuration: the immutable, merged mapping a pipeline run executes
// under. Built once per run by deep-merging YAML documents (environment
// files first, executor overrides last), then read-only during execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::errors::ExecutorError;

/// Registry credentials for pulling the step image.
///
/// All three sub-fields are required: a registry override that supplies
/// some but not all of them is malformed and rejected at resolve time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySpec {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// The `execution.docker.config` section of a run configuration, or a
/// per-target container-context override carrying the same keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerExecutorConfig {
    /// Image to run step containers from, when not carried by the step.
    #[serde(default)]
    pub image: Option<String>,

    /// Networks to attach each step container to, in order.
    #[serde(default)]
    pub networks: Vec<String>,

    /// Names of host environment variables to forward into step containers.
    #[serde(default)]
    pub env_vars: Vec<String>,

    /// Registry credentials for the step image.
    #[serde(default)]
    pub registry: Option<RegistrySpec>,

    /// Additional container create options passed through verbatim.
    #[serde(default)]
    pub container_kwargs: BTreeMap<String, Value>,

    /// Whether the scheduler may retry a step whose container failed to
    /// launch. The executor itself never retries; it only surfaces the
    /// policy to the scheduler alongside the failure. Unset inherits from
    /// the layer below; the resolved default is off.
    #[serde(default)]
    pub retry_on_launch_failure: Option<bool>,
}

/// Immutable run configuration backed by a merged YAML mapping.
#[derive(Debug, Clone)]
pub struct RunConfig {
    root: Value,
}

impl RunConfig {
    /// Build a run configuration by deep-merging YAML documents in order.
    /// Later documents win field-by-field; mappings merge recursively,
    /// scalars and sequences replace.
    pub fn from_yaml_docs(docs: &[&str]) -> Result<Self, ExecutorError> {
        let mut root = Value::Mapping(Default::default());
        for doc in docs {
            let parsed: Value = serde_yaml::from_str(doc)
                .map_err(|e| ExecutorError::Configuration(format!("invalid yaml: {}", e)))?;
            root = deep_merge(root, parsed);
        }
        Ok(Self { root })
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// The raw merged mapping.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// The docker executor configuration section
    /// (`execution.docker.config`), deserialized. Absent section yields the
    /// default (empty) config; a malformed section is a configuration error.
    pub fn executor_config(&self) -> Result<DockerExecutorConfig, ExecutorError> {
        match self.lookup(&["execution", "docker", "config"]) {
            None => Ok(DockerExecutorConfig::default()),
            Some(section) => serde_yaml::from_value(section.clone()).map_err(|e| {
                ExecutorError::Configuration(format!("invalid executor config: {}", e))
            }),
        }
    }

    /// The `config` mapping of a single step (`solids.<key>.config`), when
    /// the run configuration carries one.
    pub fn step_config(&self, step_key: &str) -> Option<&Value> {
        self.lookup(&["solids", step_key, "config"])
    }

    fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.root;
        for key in path {
            current = current.get(*key)?;
        }
        Some(current)
    }
}

/// Recursive field-level merge: mappings merge key-by-key with `overlay`
/// winning on conflicts, everything else is replaced by `overlay`.
fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}
