//! In-memory capability providers for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use wayfarer_core::gateway::{
    CapabilityError, Coordinates, GenerationRequest, LocationCapability, RouteSummary,
    SearchCapability, SearchOutcome, SearchParams, TextChunk, TextChunkStream, TextGenerator,
    TravelMode,
};

/// Mock text generator for testing
///
/// Single-shot replies are consumed in order. Streams replay the configured
/// chunks, optionally pausing before each one.
#[derive(Default)]
pub struct MockTextGenerator {
    replies: Mutex<VecDeque<String>>,
    stream: Vec<TextChunk>,
    chunk_delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply.into());
        }
        self
    }

    pub fn with_stream(mut self, chunks: Vec<TextChunk>) -> Self {
        self.stream = chunks;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn record(&self, request: GenerationRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError> {
        self.record(request);
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .ok_or_else(|| CapabilityError::Unavailable("mock has no reply left".to_string()))
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<TextChunkStream, CapabilityError> {
        if self.stream.is_empty() {
            let text = self.generate(request).await?;
            return Ok(Box::pin(futures_util::stream::once(async move {
                Ok(TextChunk::content(text))
            })));
        }
        self.record(request);
        let chunks = self.stream.clone();
        let delay = self.chunk_delay;
        Ok(Box::pin(async_stream::stream! {
            for chunk in chunks {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
        }))
    }
}

/// Mock search with a fixed answer and a call counter
pub struct MockSearch {
    outcome: SearchOutcome,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn new(outcome: SearchOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchCapability for MockSearch {
    async fn search(&self, _params: SearchParams) -> Result<SearchOutcome, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Mock location service knowing a fixed set of places
#[derive(Default)]
pub struct MockLocation {
    places: HashMap<String, Coordinates>,
}

impl MockLocation {
    pub fn with_place(mut self, name: impl Into<String>, lng: f64, lat: f64) -> Self {
        self.places.insert(name.into(), Coordinates { lng, lat });
        self
    }
}

#[async_trait]
impl LocationCapability for MockLocation {
    async fn geocode(&self, name: &str, _city: Option<&str>) -> Option<Coordinates> {
        self.places.get(name).copied()
    }

    async fn route(
        &self,
        from: Coordinates,
        to: Coordinates,
        _mode: TravelMode,
    ) -> Option<RouteSummary> {
        let distance = ((to.lng - from.lng).abs() + (to.lat - from.lat).abs()) * 100_000.0;
        Some(RouteSummary {
            distance,
            duration: distance / 10.0,
            steps: Vec::new(),
        })
    }
}
