//! HTTP lodging search client.
//!
//! The search service receives the parameters as a JSON body and answers
//! with `{success, hotels|items, error}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use tracing::{debug, info};

use wayfarer_core::gateway::{CapabilityError, SearchCapability, SearchOutcome, SearchParams};

use crate::ProviderError;

pub struct HttpSearchClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSearchClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl SearchCapability for HttpSearchClient {
    async fn search(&self, params: SearchParams) -> Result<SearchOutcome, CapabilityError> {
        info!(destination = %params.destination, rooms = params.rooms, "searching lodging");
        let mut request = self.client.post(&self.endpoint).json(&params);
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| CapabilityError::Http(e.to_string()))?;
            request = request.header(AUTHORIZATION, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Response(format!("HTTP {}: {}", status, text)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;
        let outcome = parse_outcome(&text)?;
        debug!(success = outcome.success, items = outcome.items.len(), "search answered");
        Ok(outcome)
    }
}

fn parse_outcome(text: &str) -> Result<SearchOutcome, CapabilityError> {
    serde_json::from_str(text).map_err(|e| CapabilityError::Serialization(e.to_string()))
}

/// Search stand-in when no search service is configured.
pub struct UnconfiguredSearch;

#[async_trait]
impl SearchCapability for UnconfiguredSearch {
    async fn search(&self, _params: SearchParams) -> Result<SearchOutcome, CapabilityError> {
        Err(CapabilityError::Unavailable(
            "no search service is configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_outcome_accepts_service_shapes() {
        let found = parse_outcome(r#"{"success": true, "hotels": [{"name": "Jinjiang"}]}"#)
            .expect("outcome");
        assert_eq!(found.items, vec![json!({"name": "Jinjiang"})]);

        let failed = parse_outcome(r#"{"success": false, "error": "captcha"}"#).expect("outcome");
        assert_eq!(failed, SearchOutcome::failed("captcha"));

        assert!(matches!(
            parse_outcome("<html>"),
            Err(CapabilityError::Serialization(_))
        ));
    }

    #[test]
    fn test_unconfigured_search_is_unavailable() {
        let params = SearchParams::from_params(
            json!({"destination": "Chengdu"}).as_object().expect("object"),
        )
        .expect("params");
        let result = tokio_test::block_on(UnconfiguredSearch.search(params));
        assert!(matches!(result, Err(CapabilityError::Unavailable(_))));
    }
}
