//! Capability providers for wayfarer.
//!
//! This crate provides concrete implementations of the gateway traits:
//! - OpenAI-compatible text generation (single-shot and streaming)
//! - HTTP lodging search
//! - HTTP geocoding and routing
//! - In-memory mocks for tests
//!
//! Use [`build_gateway`] to assemble a gateway from configuration.

mod factory;
mod llm;
mod location;
mod mock;
mod search;

pub use factory::{build_gateway, call_timeouts, task_settings};
pub use llm::{HttpTextGenerator, HttpTextGeneratorConfig, SseDeltaDecoder};
pub use location::HttpLocationClient;
pub use mock::{MockLocation, MockSearch, MockTextGenerator};
pub use search::{HttpSearchClient, UnconfiguredSearch};

use thiserror::Error;

/// Errors that can occur when building a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http client error: {0}")]
    Client(String),
    #[error("environment variable '{0}' not found")]
    EnvNotFound(String),
}
