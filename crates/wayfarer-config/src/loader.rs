//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::WayfarerConfig;

const TRAVEL_MODES: [&str; 3] = ["driving", "walking", "transit"];

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("environment variable '{0}' is not set")]
    MissingSecret(String),
}

/// Load full wayfarer configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<WayfarerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

pub(crate) fn parse_config(content: &str) -> Result<WayfarerConfig, ConfigError> {
    let config: WayfarerConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Read a secret from the environment variable named by the config.
pub fn resolve_secret(env_name: &str) -> Result<String, ConfigError> {
    match std::env::var(env_name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingSecret(env_name.to_string())),
    }
}

fn validate_config(config: &WayfarerConfig) -> Result<(), ConfigError> {
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

    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "server.listen must not be empty".to_string(),
        ));
    }

    if config.server.keepalive_secs == 0 {
        return Err(ConfigError::Invalid(
            "server.keepalive_secs must be > 0".to_string(),
        ));
    }

    if config.server.event_buffer == 0 {
        return Err(ConfigError::Invalid(
            "server.event_buffer must be > 0".to_string(),
        ));
    }

    validate_generation(config)?;

    if config.search.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "search.timeout_secs must be > 0".to_string(),
        ));
    }

    if config.search.max_items == 0 {
        return Err(ConfigError::Invalid(
            "search.max_items must be > 0".to_string(),
        ));
    }

    if !TRAVEL_MODES.contains(&config.location.travel_mode.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "location.travel_mode '{}' must be one of {}",
            config.location.travel_mode,
            TRAVEL_MODES.join(", ")
        )));
    }

    Ok(())
}

fn validate_generation(config: &WayfarerConfig) -> Result<(), ConfigError> {
    let generation = &config.generation;
    if generation.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "generation.endpoint must not be empty".to_string(),
        ));
    }
    if generation.model.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "generation.model must not be empty".to_string(),
        ));
    }
    for (name, value) in [
        ("classify_temperature", generation.classify_temperature),
        ("synthesis_temperature", generation.synthesis_temperature),
    ] {
        if !(0.0..=2.0).contains(&value) {
            return Err(ConfigError::Invalid(format!(
                "generation.{} must be within 0.0..=2.0, got {}",
                name, value
            )));
        }
    }
    if generation.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "generation.timeout_secs must be > 0".to_string(),
        ));
    }
    Ok(())
}
