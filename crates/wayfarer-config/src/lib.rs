//! # Wayfarer Config
//!
//! Unified single-file configuration for wayfarer.
//! A single `wayfarer.yaml` configures the HTTP server, the text generation,
//! search and location providers, and observability settings. Every section
//! is optional; missing values fall back to defaults.

mod loader;

pub use loader::{load_config, resolve_secret, ConfigError};

use serde::Deserialize;

/// Top-level configuration schema for wayfarer.
#[derive(Debug, Clone, Deserialize)]
pub struct WayfarerConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for WayfarerConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            server: ServerConfig::default(),
            generation: GenerationConfig::default(),
            search: SearchConfig::default(),
            location: LocationConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "wayfarer".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Seconds of silence before a keep-alive frame is sent
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Buffered events per run before the pipeline waits on the client
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// CORS origins; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            keepalive_secs: default_keepalive_secs(),
            event_buffer: default_event_buffer(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_keepalive_secs() -> u64 {
    10
}

fn default_event_buffer() -> usize {
    64
}

/// OpenAI-compatible chat completion backend
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the API key
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_classify_temperature")]
    pub classify_temperature: f32,
    #[serde(default = "default_synthesis_temperature")]
    pub synthesis_temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            api_key_env: default_llm_key_env(),
            model: default_model(),
            classify_temperature: default_classify_temperature(),
            synthesis_temperature: default_synthesis_temperature(),
            max_tokens: None,
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_key_env() -> String {
    "LLM_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_classify_temperature() -> f32 {
    0.3
}

fn default_synthesis_temperature() -> f32 {
    0.7
}

fn default_generation_timeout() -> u64 {
    60
}

/// Lodging search service
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Endpoint of the search service; unset disables searching
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_search_timeout(),
            max_items: default_max_items(),
        }
    }
}

fn default_search_timeout() -> u64 {
    90
}

fn default_max_items() -> usize {
    20
}

/// Geocoding and routing service
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Base URL of the location service; unset disables lookups
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_location_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_location_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_travel_mode")]
    pub travel_mode: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_location_key_env(),
            timeout_secs: default_location_timeout(),
            travel_mode: default_travel_mode(),
        }
    }
}

fn default_location_key_env() -> String {
    "LOCATION_API_KEY".to_string()
}

fn default_location_timeout() -> u64 {
    10
}

fn default_travel_mode() -> String {
    "driving".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub traces_enabled: bool,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            traces_enabled: false,
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
