use std::path::{Path, PathBuf};

use crate::config::schema::{ObjectStoreConfig, RuntimeConfig};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "LABDOCK_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<RuntimeConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: RuntimeConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// `$LABDOCK_CONFIG` if set, else `~/.labdock/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::home_dir().map(|h| h.join(".labdock").join("config.json"))
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express. Also applied to configs built
/// in code.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.workspace_root.as_os_str().is_empty() || config.cache_root.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "workspace_root and cache_root must not be empty".to_string(),
        });
    }

    if config.workspace_root == config.cache_root {
        return Err(ConfigError::Validation {
            message: "workspace_root and cache_root must be different directories".to_string(),
        });
    }

    let domain = &config.routing.base_domain;
    if domain.is_empty()
        || domain.contains("://")
        || domain.contains('/')
        || domain.starts_with('.')
        || domain.chars().any(char::is_whitespace)
    {
        return Err(ConfigError::Validation {
            message: format!("Invalid routing base_domain: '{}'", domain),
        });
    }

    let reaper = &config.reaper;
    if reaper.deployment_interval_secs == 0
        || reaper.deployment_idle_secs == 0
        || reaper.cache_interval_secs == 0
        || reaper.cache_idle_secs == 0
    {
        return Err(ConfigError::Validation {
            message: "Reaper intervals and idle thresholds must be positive".to_string(),
        });
    }

    if config.engine.build_timeout_secs == 0 || config.engine.command_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "Engine timeouts must be positive".to_string(),
        });
    }

    if config.logs.default_tail == 0 {
        return Err(ConfigError::Validation {
            message: "logs.default_tail must be positive".to_string(),
        });
    }

    match &config.object_store {
        ObjectStoreConfig::Fs { root } if root.as_os_str().is_empty() => {
            return Err(ConfigError::Validation {
                message: "object_store.root must not be empty".to_string(),
            });
        }
        ObjectStoreConfig::Http { timeout_secs, .. } if *timeout_secs == 0 => {
            return Err(ConfigError::Validation {
                message: "object_store.timeout_secs must be positive".to_string(),
            });
        }
        _ => {}
    }

    Ok(())
}
