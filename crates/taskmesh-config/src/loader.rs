//! Configuration loading and environment overrides.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::TaskmeshConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load configuration from a YAML file, then apply `TASKMESH_*` environment
/// overrides for deployment-specific values.
pub fn load_config(path: &Path) -> Result<TaskmeshConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: TaskmeshConfig = serde_yaml::from_str(&content)?;
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut TaskmeshConfig) {
    if let Ok(url) = std::env::var("TASKMESH_DURABLE_URL") {
        config.stores.durable.connection_url = Some(url);
    }
    if let Ok(url) = std::env::var("TASKMESH_COORD_URL") {
        config.stores.coord.connection_url = Some(url);
    }
    if let Ok(key) = std::env::var("TASKMESH_PLANNER_API_KEY") {
        config.planner.api_key = Some(key);
    }
    if let Ok(id) = std::env::var("TASKMESH_WORKER_ID") {
        config.worker.id = id;
    }
}

fn validate_config(config: &TaskmeshConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    let orch = &config.orchestrator;
    if orch.liveness_window_seconds == 0 {
        return Err(ConfigError::Invalid(
            "orchestrator.liveness_window_seconds must be > 0".to_string(),
        ));
    }
    if orch.heartbeat_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "orchestrator.heartbeat_interval_seconds must be > 0".to_string(),
        ));
    }
    if orch.heartbeat_interval_seconds >= orch.liveness_window_seconds {
        return Err(ConfigError::Invalid(
            "orchestrator.heartbeat_interval_seconds must be below the liveness window"
                .to_string(),
        ));
    }
    if orch.dequeue_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "orchestrator.dequeue_timeout_seconds must be > 0".to_string(),
        ));
    }
    if orch.dispatcher_concurrency == 0 || orch.result_processor_concurrency == 0 {
        return Err(ConfigError::Invalid(
            "orchestrator concurrency values must be > 0".to_string(),
        ));
    }
    match orch.selection_policy.as_str() {
        "intersects" | "covers" => {}
        other => {
            return Err(ConfigError::Invalid(format!(
                "orchestrator.selection_policy must be 'intersects' or 'covers', got '{other}'"
            )));
        }
    }

    for spec in [&config.stores.durable, &config.stores.coord] {
        match spec.backend.trim().to_ascii_lowercase().as_str() {
            "in_memory" | "memory" => {}
            _ if spec.connection_url.is_none() => {
                return Err(ConfigError::Invalid(format!(
                    "store backend '{}' requires connection_url",
                    spec.backend
                )));
            }
            _ => {}
        }
    }

    if config.worker.capabilities.is_empty() {
        return Err(ConfigError::Invalid(
            "worker.capabilities must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: TaskmeshConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config.version, 1);
        assert_eq!(config.orchestrator.liveness_window_seconds, 60);
        assert_eq!(config.orchestrator.heartbeat_interval_seconds, 10);
        assert_eq!(config.orchestrator.dispatch_timeout_seconds, 5);
        assert_eq!(config.orchestrator.selection_policy, "intersects");
        assert_eq!(config.stores.durable.backend, "in_memory");
        assert_eq!(config.stores.durable.pool_min, 2);
        assert_eq!(config.stores.durable.pool_max, 20);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_partial_document_overrides_selected_fields() {
        let yaml = r#"
orchestrator:
  dispatcher_concurrency: 4
  selection_policy: covers
stores:
  coord:
    backend: redis
    connection_url: redis://localhost:6379/0
planner:
  mode: single_step
"#;
        let config: TaskmeshConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.orchestrator.dispatcher_concurrency, 4);
        assert_eq!(config.orchestrator.selection_policy, "covers");
        assert_eq!(config.stores.coord.backend, "redis");
        assert_eq!(config.planner.mode, "single_step");
        // Untouched sections keep their defaults.
        assert_eq!(config.orchestrator.result_processor_concurrency, 1);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_selection_policy() {
        let mut config = TaskmeshConfig::default();
        config.orchestrator.selection_policy = "closest".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_heartbeat_slower_than_window() {
        let mut config = TaskmeshConfig::default();
        config.orchestrator.heartbeat_interval_seconds = 90;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_requires_connection_url_for_external_backends() {
        let mut config = TaskmeshConfig::default();
        config.stores.coord.backend = "redis".to_string();
        assert!(validate_config(&config).is_err());

        config.stores.coord.connection_url = Some("redis://localhost:6379/0".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_requires_worker_capabilities() {
        let mut config = TaskmeshConfig::default();
        config.worker.capabilities.clear();
        assert!(validate_config(&config).is_err());
    }
}
