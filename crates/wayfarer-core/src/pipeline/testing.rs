//! Recording fakes for pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{run_task, EventSink, PipelineTask, RunReport};
use crate::gateway::{
    CapabilityError, CapabilityGateway, Coordinates, GenerationRequest, LocationCapability,
    RouteSummary, SearchCapability, SearchOutcome, SearchParams, TextChunk, TextChunkStream,
    TextGenerator, TravelMode,
};
use crate::types::StreamEvent;

/// Run `task` and collect every event it emits.
pub(crate) async fn collect_events(task: &dyn PipelineTask) -> (Vec<StreamEvent>, RunReport) {
    let (sink, mut rx) = EventSink::channel(8);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });
    let report = run_task(task, sink).await;
    let events = collector.await.expect("collector task");
    (events, report)
}

type StreamScript = Result<Vec<Result<TextChunk, CapabilityError>>, CapabilityError>;

/// Text generator answering from scripts and recording every request.
#[derive(Default)]
pub(crate) struct ScriptedText {
    replies: Mutex<VecDeque<Result<String, CapabilityError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedText {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(self, text: &str) -> Self {
        self.replies
            .lock()
            .expect("lock")
            .push_back(Ok(text.to_string()));
        self
    }

    pub(crate) fn reply_error(self, err: CapabilityError) -> Self {
        self.replies.lock().expect("lock").push_back(Err(err));
        self
    }

    pub(crate) fn stream(self, chunks: Vec<Result<TextChunk, CapabilityError>>) -> Self {
        self.streams.lock().expect("lock").push_back(Ok(chunks));
        self
    }

    pub(crate) fn stream_error(self, err: CapabilityError) -> Self {
        self.streams.lock().expect("lock").push_back(Err(err));
        self
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedText {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError> {
        self.requests.lock().expect("lock").push(request);
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(CapabilityError::Unavailable("no scripted reply".to_string())))
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<TextChunkStream, CapabilityError> {
        self.requests.lock().expect("lock").push(request);
        let script = self
            .streams
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(CapabilityError::Unavailable("no scripted stream".to_string())));
        let chunks = script?;
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// Search capability with a fixed answer and a call counter.
pub(crate) struct RecordingSearch {
    outcome: Result<SearchOutcome, CapabilityError>,
    calls: AtomicUsize,
    last: Mutex<Option<SearchParams>>,
}

impl RecordingSearch {
    pub(crate) fn new(outcome: Result<SearchOutcome, CapabilityError>) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_params(&self) -> Option<SearchParams> {
        self.last.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SearchCapability for RecordingSearch {
    async fn search(&self, params: SearchParams) -> Result<SearchOutcome, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().expect("lock") = Some(params);
        self.outcome.clone()
    }
}

/// Location capability that knows a fixed set of places.
#[derive(Default)]
pub(crate) struct FixedLocation {
    places: HashMap<String, Coordinates>,
    routes: AtomicUsize,
}

impl FixedLocation {
    pub(crate) fn with_place(mut self, name: &str, lng: f64, lat: f64) -> Self {
        self.places.insert(name.to_string(), Coordinates { lng, lat });
        self
    }

    pub(crate) fn route_calls(&self) -> usize {
        self.routes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationCapability for FixedLocation {
    async fn geocode(&self, name: &str, _city: Option<&str>) -> Option<Coordinates> {
        self.places.get(name).copied()
    }

    async fn route(
        &self,
        from: Coordinates,
        to: Coordinates,
        _mode: TravelMode,
    ) -> Option<RouteSummary> {
        self.routes.fetch_add(1, Ordering::SeqCst);
        let distance = ((to.lng - from.lng).powi(2) + (to.lat - from.lat).powi(2)).sqrt() * 100_000.0;
        Some(RouteSummary {
            distance: distance.round(),
            duration: (distance / 10.0).round(),
            steps: Vec::new(),
        })
    }
}

pub(crate) fn gateway(
    text: &Arc<ScriptedText>,
    search: &Arc<RecordingSearch>,
) -> CapabilityGateway {
    CapabilityGateway::new(text.clone(), search.clone())
}
