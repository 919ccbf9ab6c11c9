// Container context resolution: merge the executor-level docker config with
// a per-target container-context override into one effective launch policy.
// Pure and deterministic; explicit override fields win field-by-field.

use std::collections::BTreeMap;

use indexmap::IndexSet;
use serde_yaml::Value;

use flowline_common::{DockerExecutorConfig, ExecutorError, RegistrySpec};

/// Effective launch policy for one target (image + registry).
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerContext {
    /// Image to run step containers from, unless the step carries its own.
    pub image: Option<String>,

    /// Networks to attach, in declaration order, de-duplicated.
    pub networks: IndexSet<String>,

    /// Host environment variable names to forward into the container.
    pub env_vars: IndexSet<String>,

    /// Registry credentials for the image.
    pub registry: Option<RegistrySpec>,

    /// Extra container create options, passed through to the runtime.
    pub container_kwargs: BTreeMap<String, Value>,

    /// Whether the scheduler may retry a failed launch of this target.
    pub retry_on_launch_failure: bool,
}

impl ContainerContext {
    /// Merge executor-level configuration with an optional per-target
    /// override. For each field, a non-empty override value replaces the
    /// executor default; an unset or empty override field inherits it.
    pub fn resolve(
        executor: &DockerExecutorConfig,
        override_config: Option<&DockerExecutorConfig>,
    ) -> Result<Self, ExecutorError> {
        let merged = match override_config {
            None => executor.clone(),
            Some(overlay) => DockerExecutorConfig {
                image: overlay.image.clone().or_else(|| executor.image.clone()),
                networks: pick_non_empty(&overlay.networks, &executor.networks),
                env_vars: pick_non_empty(&overlay.env_vars, &executor.env_vars),
                registry: overlay
                    .registry
                    .clone()
                    .or_else(|| executor.registry.clone()),
                container_kwargs: if overlay.container_kwargs.is_empty() {
                    executor.container_kwargs.clone()
                } else {
                    overlay.container_kwargs.clone()
                },
                retry_on_launch_failure: overlay
                    .retry_on_launch_failure
                    .or(executor.retry_on_launch_failure),
            },
        };

        if let Some(ref registry) = merged.registry {
            validate_registry(registry)?;
        }

        Ok(Self {
            image: merged.image,
            networks: merged.networks.into_iter().collect(),
            env_vars: merged.env_vars.into_iter().collect(),
            registry: merged.registry,
            container_kwargs: merged.container_kwargs,
            retry_on_launch_failure: merged.retry_on_launch_failure.unwrap_or(false),
        })
    }
}

fn pick_non_empty(overlay: &[String], base: &[String]) -> Vec<String> {
    if overlay.is_empty() {
        base.to_vec()
    } else {
        overlay.to_vec()
    }
}

/// A registry spec that made it past deserialization can still carry empty
/// strings; any empty required sub-field is a malformed override.
fn validate_registry(registry: &RegistrySpec) -> Result<(), ExecutorError> {
    if registry.url.is_empty() || registry.username.is_empty() || registry.password.is_empty() {
        return Err(ExecutorError::Configuration(
            "registry requires url, username, and password".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor_config() -> DockerExecutorConfig {
        DockerExecutorConfig {
            image: Some("flowline/base:latest".to_string()),
            networks: vec!["default-net".to_string()],
            env_vars: vec!["PIPELINE_ENV".to_string()],
            registry: None,
            container_kwargs: BTreeMap::new(),
            retry_on_launch_failure: None,
        }
    }

    #[test]
    fn test_no_override_keeps_executor_defaults() {
        let context = ContainerContext::resolve(&executor_config(), None).unwrap();
        assert_eq!(context.image.as_deref(), Some("flowline/base:latest"));
        assert!(context.networks.contains("default-net"));
        assert!(context.env_vars.contains("PIPELINE_ENV"));
    }

    #[test]
    fn test_override_wins_per_field_not_wholesale() {
        let overlay = DockerExecutorConfig {
            networks: vec!["container:test-postgres-db-docker".to_string()],
            ..Default::default()
        };
        let context = ContainerContext::resolve(&executor_config(), Some(&overlay)).unwrap();

        // networks replaced, everything else inherited
        assert_eq!(
            context.networks.iter().collect::<Vec<_>>(),
            vec!["container:test-postgres-db-docker"]
        );
        assert_eq!(context.image.as_deref(), Some("flowline/base:latest"));
        assert!(context.env_vars.contains("PIPELINE_ENV"));
    }

    #[test]
    fn test_override_substitutes_for_empty_default() {
        let overlay = DockerExecutorConfig {
            networks: vec!["container:test-postgres-db-docker".to_string()],
            env_vars: vec![
                "AWS_ACCESS_KEY_ID".to_string(),
                "AWS_SECRET_ACCESS_KEY".to_string(),
            ],
            ..Default::default()
        };
        let context =
            ContainerContext::resolve(&DockerExecutorConfig::default(), Some(&overlay)).unwrap();

        assert_eq!(
            context.networks.iter().collect::<Vec<_>>(),
            vec!["container:test-postgres-db-docker"]
        );
        assert_eq!(
            context.env_vars.iter().collect::<Vec<_>>(),
            vec!["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]
        );
    }

    #[test]
    fn test_registry_override_replaces_default() {
        let mut base = executor_config();
        base.registry = Some(RegistrySpec {
            url: "base.example.com".to_string(),
            username: "base".to_string(),
            password: "base-secret".to_string(),
        });
        let overlay = DockerExecutorConfig {
            registry: Some(RegistrySpec {
                url: "override.example.com".to_string(),
                username: "ci".to_string(),
                password: "ci-secret".to_string(),
            }),
            ..Default::default()
        };

        let context = ContainerContext::resolve(&base, Some(&overlay)).unwrap();
        assert_eq!(context.registry.unwrap().url, "override.example.com");
    }

    #[test]
    fn test_malformed_registry_fails_resolution() {
        let overlay = DockerExecutorConfig {
            registry: Some(RegistrySpec {
                url: "override.example.com".to_string(),
                username: String::new(),
                password: String::new(),
            }),
            ..Default::default()
        };

        let err =
            ContainerContext::resolve(&DockerExecutorConfig::default(), Some(&overlay)).unwrap_err();
        assert!(matches!(err, ExecutorError::Configuration(_)));
    }

    #[test]
    fn test_override_can_disable_launch_retry() {
        let mut base = executor_config();
        base.retry_on_launch_failure = Some(true);

        // An explicit `false` switches the executor default off; an unset
        // override inherits it.
        let overlay = DockerExecutorConfig {
            retry_on_launch_failure: Some(false),
            ..Default::default()
        };
        let disabled = ContainerContext::resolve(&base, Some(&overlay)).unwrap();
        assert!(!disabled.retry_on_launch_failure);

        let inherited =
            ContainerContext::resolve(&base, Some(&DockerExecutorConfig::default())).unwrap();
        assert!(inherited.retry_on_launch_failure);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let overlay = DockerExecutorConfig {
            env_vars: vec!["B".to_string(), "A".to_string(), "B".to_string()],
            ..Default::default()
        };
        let first = ContainerContext::resolve(&executor_config(), Some(&overlay)).unwrap();
        let second = ContainerContext::resolve(&executor_config(), Some(&overlay)).unwrap();

        assert_eq!(first, second);
        // order preserved, duplicates collapsed
        assert_eq!(first.env_vars.iter().collect::<Vec<_>>(), vec!["B", "A"]);
    }
}
