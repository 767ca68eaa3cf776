//! Capability gateway
//!
//! Narrow interfaces to the slow, unreliable operations a pipeline depends
//! on: text generation, search and location lookups. Concrete providers
//! live outside this crate; pipelines receive a constructed
//! [`CapabilityGateway`] value and never reach for globals.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("{capability} timed out after {secs}s")]
    Timeout { capability: String, secs: u64 },
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    pub fn timeout(capability: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            capability: capability.into(),
            secs: after.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Attached image URLs, `http(s)` or `data:` URLs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Whether the message carries any text or image.
    pub fn has_payload(&self) -> bool {
        !self.content.trim().is_empty() || !self.images.is_empty()
    }
}

/// Text generation request payload
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's configured model
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Which channel a generated delta belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Reasoning,
    Content,
}

/// One delta of a streamed generation
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub kind: DeltaKind,
    pub text: String,
}

impl TextChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Content,
            text: text.into(),
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Reasoning,
            text: text.into(),
        }
    }
}

pub type TextChunkStream = Pin<Box<dyn Stream<Item = Result<TextChunk, CapabilityError>> + Send>>;

/// Text generation capability
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError>;

    /// Streamed generation. The default delivers the single-shot answer as one chunk.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<TextChunkStream, CapabilityError> {
        let text = self.generate(request).await?;
        Ok(Box::pin(futures_util::stream::once(async move {
            Ok(TextChunk::content(text))
        })))
    }
}

/// Parameters of a lodging search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub destination: String,
    #[serde(default)]
    pub checkin_date: Option<String>,
    #[serde(default)]
    pub checkout_date: Option<String>,
    pub adults: u32,
    pub children: u32,
    pub rooms: u32,
    #[serde(default)]
    pub children_ages: Vec<u32>,
    pub pets: bool,
}

impl SearchParams {
    /// Build search parameters from a loosely typed parameter map.
    ///
    /// Counts accept numbers or numeric strings and fall back to defaults.
    /// Returns the names of missing required fields on failure.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self, Vec<String>> {
        let destination = params
            .get("destination")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| vec!["destination".to_string()])?;

        Ok(Self {
            destination: destination.to_string(),
            checkin_date: optional_text(params, "checkin_date"),
            checkout_date: optional_text(params, "checkout_date"),
            adults: count_or(params, "adults", 2),
            children: count_or(params, "children", 0),
            rooms: count_or(params, "rooms", 1),
            children_ages: params
                .get("children_ages")
                .and_then(Value::as_array)
                .map(|ages| ages.iter().filter_map(as_count).collect())
                .unwrap_or_default(),
            pets: params.get("pets").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

fn optional_text(params: &Map<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

fn count_or(params: &Map<String, Value>, key: &str, default: u32) -> u32 {
    params.get(key).and_then(as_count).unwrap_or(default)
}

fn as_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Answer of the search capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub success: bool,
    #[serde(default, alias = "hotels")]
    pub items: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn found(items: Vec<Value>) -> Self {
        Self {
            success: true,
            items,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            items: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Search capability
#[async_trait]
pub trait SearchCapability: Send + Sync {
    async fn search(&self, params: SearchParams) -> Result<SearchOutcome, CapabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lng: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Driving,
    Walking,
    Transit,
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TravelMode::Driving => "driving",
            TravelMode::Walking => "walking",
            TravelMode::Transit => "transit",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub instruction: String,
    #[serde(default)]
    pub distance: Option<f64>,
}

/// Route between two points; distance in meters, duration in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub distance: f64,
    pub duration: f64,
    #[serde(default)]
    pub steps: Vec<RouteStep>,
}

/// Best-effort location lookups. `None` means "not found or not available".
#[async_trait]
pub trait LocationCapability: Send + Sync {
    async fn geocode(&self, name: &str, city: Option<&str>) -> Option<Coordinates>;

    async fn route(
        &self,
        from: Coordinates,
        to: Coordinates,
        mode: TravelMode,
    ) -> Option<RouteSummary>;
}

/// Location capability used when no provider is configured.
pub struct NoopLocation;

#[async_trait]
impl LocationCapability for NoopLocation {
    async fn geocode(&self, _name: &str, _city: Option<&str>) -> Option<Coordinates> {
        None
    }

    async fn route(
        &self,
        _from: Coordinates,
        _to: Coordinates,
        _mode: TravelMode,
    ) -> Option<RouteSummary> {
        None
    }
}

/// Per-capability call timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Single-shot call, stream opening and every wait for the next chunk
    pub generation: Duration,
    pub search: Duration,
    /// Each geocode or route lookup
    pub location: Duration,
}

impl CallTimeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            generation: timeout,
            search: timeout,
            location: timeout,
        }
    }
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_CALL_TIMEOUT)
    }
}

/// Bundle of capability handles, each call bounded by its own timeout
#[derive(Clone)]
pub struct CapabilityGateway {
    text: Arc<dyn TextGenerator>,
    search: Arc<dyn SearchCapability>,
    location: Arc<dyn LocationCapability>,
    timeouts: CallTimeouts,
}

impl CapabilityGateway {
    pub fn new(text: Arc<dyn TextGenerator>, search: Arc<dyn SearchCapability>) -> Self {
        Self {
            text,
            search,
            location: Arc::new(NoopLocation),
            timeouts: CallTimeouts::default(),
        }
    }

    pub fn with_location(mut self, location: Arc<dyn LocationCapability>) -> Self {
        self.location = location;
        self
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Same timeout for every capability.
    pub fn with_call_timeout(self, call_timeout: Duration) -> Self {
        self.with_timeouts(CallTimeouts::uniform(call_timeout))
    }

    pub fn timeouts(&self) -> CallTimeouts {
        self.timeouts
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError> {
        let limit = self.timeouts.generation;
        tokio::time::timeout(limit, self.text.generate(request))
            .await
            .map_err(|_| CapabilityError::timeout("text generation", limit))?
    }

    /// Open a generation stream. The timeout covers opening the stream and
    /// every wait for the next chunk.
    pub async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<TextChunkStream, CapabilityError> {
        let limit = self.timeouts.generation;
        let mut inner = tokio::time::timeout(limit, self.text.generate_stream(request))
            .await
            .map_err(|_| CapabilityError::timeout("text generation", limit))??;

        Ok(Box::pin(async_stream::stream! {
            loop {
                match tokio::time::timeout(limit, inner.next()).await {
                    Ok(Some(item)) => yield item,
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(CapabilityError::timeout("text generation", limit));
                        break;
                    }
                }
            }
        }))
    }

    pub async fn search(&self, params: SearchParams) -> Result<SearchOutcome, CapabilityError> {
        let limit = self.timeouts.search;
        tokio::time::timeout(limit, self.search.search(params))
            .await
            .map_err(|_| CapabilityError::timeout("search", limit))?
    }

    pub async fn geocode(&self, name: &str, city: Option<&str>) -> Option<Coordinates> {
        let limit = self.timeouts.location;
        match tokio::time::timeout(limit, self.location.geocode(name, city)).await {
            Ok(found) => found,
            Err(_) => {
                warn!(place = %name, timeout_secs = limit.as_secs(), "geocode timed out");
                None
            }
        }
    }

    pub async fn route(
        &self,
        from: Coordinates,
        to: Coordinates,
        mode: TravelMode,
    ) -> Option<RouteSummary> {
        let limit = self.timeouts.location;
        match tokio::time::timeout(limit, self.location.route(from, to, mode)).await {
            Ok(found) => found,
            Err(_) => {
                warn!(%mode, timeout_secs = limit.as_secs(), "route lookup timed out");
                None
            }
        }
    }
}
