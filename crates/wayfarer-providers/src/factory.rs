//! Gateway assembly from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use wayfarer_config::{resolve_secret, WayfarerConfig};
use wayfarer_core::gateway::{
    CallTimeouts, CapabilityGateway, LocationCapability, NoopLocation, SearchCapability, TravelMode,
};
use wayfarer_core::pipeline::TaskSettings;

use crate::llm::{HttpTextGenerator, HttpTextGeneratorConfig};
use crate::location::HttpLocationClient;
use crate::search::{HttpSearchClient, UnconfiguredSearch};
use crate::ProviderError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the capability gateway described by `config`.
///
/// A missing generation key is an error. A missing search endpoint or
/// location endpoint leaves that capability unavailable instead.
pub fn build_gateway(config: &WayfarerConfig) -> Result<CapabilityGateway, ProviderError> {
    let api_key = resolve_secret(&config.generation.api_key_env)
        .map_err(|_| ProviderError::EnvNotFound(config.generation.api_key_env.clone()))?;
    let text = HttpTextGenerator::new(HttpTextGeneratorConfig {
        endpoint: config.generation.endpoint.clone(),
        api_key: Some(api_key),
        model: config.generation.model.clone(),
        connect_timeout_secs: CONNECT_TIMEOUT.as_secs(),
        ..HttpTextGeneratorConfig::default()
    })?;

    let search: Arc<dyn SearchCapability> = match &config.search.endpoint {
        Some(endpoint) => {
            let api_key = match &config.search.api_key_env {
                Some(env_name) => Some(
                    resolve_secret(env_name)
                        .map_err(|_| ProviderError::EnvNotFound(env_name.clone()))?,
                ),
                None => None,
            };
            Arc::new(HttpSearchClient::new(endpoint.clone(), api_key, CONNECT_TIMEOUT)?)
        }
        None => {
            warn!("search.endpoint is not set, hotel search is unavailable");
            Arc::new(UnconfiguredSearch)
        }
    };

    let location: Arc<dyn LocationCapability> = match &config.location.endpoint {
        Some(endpoint) => {
            let api_key = resolve_secret(&config.location.api_key_env).ok();
            if api_key.is_none() {
                warn!(env = %config.location.api_key_env, "location key not set, calling without one");
            }
            Arc::new(HttpLocationClient::new(endpoint.clone(), api_key, CONNECT_TIMEOUT)?)
        }
        None => Arc::new(NoopLocation),
    };

    let timeouts = call_timeouts(config);
    info!(
        model = %config.generation.model,
        search = config.search.endpoint.is_some(),
        location = config.location.endpoint.is_some(),
        generation_timeout_secs = config.generation.timeout_secs,
        search_timeout_secs = config.search.timeout_secs,
        location_timeout_secs = config.location.timeout_secs,
        "capability gateway ready"
    );

    Ok(CapabilityGateway::new(Arc::new(text), search)
        .with_location(location)
        .with_timeouts(timeouts))
}

/// Call timeouts, each taken from its own config section.
pub fn call_timeouts(config: &WayfarerConfig) -> CallTimeouts {
    CallTimeouts {
        generation: Duration::from_secs(config.generation.timeout_secs),
        search: Duration::from_secs(config.search.timeout_secs),
        location: Duration::from_secs(config.location.timeout_secs),
    }
}

/// Task settings derived from `config`.
pub fn task_settings(config: &WayfarerConfig) -> TaskSettings {
    TaskSettings {
        classify_temperature: config.generation.classify_temperature,
        synthesis_temperature: config.generation.synthesis_temperature,
        max_tokens: config.generation.max_tokens,
        max_search_items: config.search.max_items,
        travel_mode: parse_travel_mode(&config.location.travel_mode),
    }
}

fn parse_travel_mode(mode: &str) -> TravelMode {
    match mode {
        "walking" => TravelMode::Walking,
        "transit" => TravelMode::Transit,
        _ => TravelMode::Driving,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_generation_key_is_reported() {
        let mut config = WayfarerConfig::default();
        config.generation.api_key_env = "WAYFARER_TEST_KEY_NEVER_SET".to_string();
        let result = build_gateway(&config);
        assert!(matches!(
            result,
            Err(ProviderError::EnvNotFound(name)) if name == "WAYFARER_TEST_KEY_NEVER_SET"
        ));
    }

    #[test]
    fn test_gateway_builds_without_optional_services() {
        let mut config = WayfarerConfig::default();
        config.generation.api_key_env = "WAYFARER_TEST_KEY_FACTORY".to_string();
        std::env::set_var("WAYFARER_TEST_KEY_FACTORY", "dummy");
        let gateway = build_gateway(&config).expect("gateway");
        std::env::remove_var("WAYFARER_TEST_KEY_FACTORY");
        assert_eq!(gateway.timeouts(), call_timeouts(&config));
    }

    #[test]
    fn test_timeouts_come_from_each_section() {
        let mut config = WayfarerConfig::default();
        config.generation.timeout_secs = 5;
        config.search.timeout_secs = 90;
        config.location.timeout_secs = 10;
        assert_eq!(
            call_timeouts(&config),
            CallTimeouts {
                generation: Duration::from_secs(5),
                search: Duration::from_secs(90),
                location: Duration::from_secs(10),
            }
        );
    }

    #[test]
    fn test_task_settings_follow_config() {
        let mut config = WayfarerConfig::default();
        config.search.max_items = 7;
        config.location.travel_mode = "walking".to_string();
        let settings = task_settings(&config);
        assert_eq!(settings.max_search_items, 7);
        assert_eq!(settings.travel_mode, TravelMode::Walking);
        assert_eq!(settings.classify_temperature, 0.3);
    }
}
