//! Turn service: one user turn in, one frame stream out.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, info_span, Instrument};

use wayfarer_config::WayfarerConfig;
use wayfarer_core::draft::{Draft, DraftError, DraftSchema};
use wayfarer_core::gateway::{CapabilityGateway, ChatMessage, ChatRole};
use wayfarer_core::pipeline::{
    run_task, ChatTask, EventSink, PipelineTask, SearchRecommendTask, TaskSettings,
    TravelPlanTask,
};
use wayfarer_providers::{build_gateway, task_settings, ProviderError};

use crate::emitter::{EventEmitter, FrameStream};
use crate::gate::ConversationGate;

const DEFAULT_EVENT_BUFFER: usize = 64;

/// Errors rejected before any frame is produced
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid draft: {0}")]
    Draft(#[from] DraftError),
}

/// What the turn asks for
#[derive(Debug, Clone)]
pub enum TurnKind {
    /// Search-and-recommend turn
    Hotel {
        message: String,
        history: Vec<ChatMessage>,
    },
    /// Plain streamed conversation
    Chat {
        messages: Vec<ChatMessage>,
        system_prompt: Option<String>,
        /// Overrides the configured generation model for this turn
        model: Option<String>,
    },
    /// Travel-plan slot filling; `draft` is the client-held state
    Plan { message: String, draft: Value },
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Turns sharing an id run one after another
    pub conversation_id: Option<String>,
    pub kind: TurnKind,
}

impl TurnRequest {
    pub fn new(kind: TurnKind) -> Self {
        Self {
            conversation_id: None,
            kind,
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

#[derive(Clone)]
pub struct TurnService {
    gateway: CapabilityGateway,
    settings: TaskSettings,
    emitter: EventEmitter,
    gate: ConversationGate,
    plan_schema: Arc<DraftSchema>,
    event_buffer: usize,
}

impl TurnService {
    pub fn new(gateway: CapabilityGateway, settings: TaskSettings) -> Self {
        Self {
            gateway,
            settings,
            emitter: EventEmitter::default(),
            gate: ConversationGate::new(),
            plan_schema: Arc::new(DraftSchema::travel_plan()),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Service wired from configuration, with HTTP providers.
    pub fn from_config(config: &WayfarerConfig) -> Result<Self, ProviderError> {
        let gateway = build_gateway(config)?;
        Ok(Self::new(gateway, task_settings(config))
            .with_keepalive(Duration::from_secs(config.server.keepalive_secs))
            .with_event_buffer(config.server.event_buffer))
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.emitter = EventEmitter::new(keepalive);
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    /// Validate the request, start its run in the background and return
    /// the frames the run produces.
    pub fn start(&self, request: TurnRequest) -> Result<FrameStream, ServiceError> {
        let task = self.build_task(request.kind)?;
        let (sink, events) = EventSink::channel(self.event_buffer);
        let span = info_span!(
            "turn",
            task = task.name(),
            conversation_id = request.conversation_id.as_deref().unwrap_or("-")
        );
        let ticket = request
            .conversation_id
            .as_deref()
            .map(|id| self.gate.enqueue(id));

        tokio::spawn(
            async move {
                let _permit = match ticket {
                    Some(ticket) => Some(ticket.wait().await),
                    None => None,
                };
                let report = run_task(task.as_ref(), sink).await;
                info!(
                    run_id = %report.run_id,
                    steps = report.steps.len(),
                    outcome = ?report.outcome,
                    "turn finished"
                );
            }
            .instrument(span),
        );

        Ok(self.emitter.frames(events))
    }

    fn build_task(&self, kind: TurnKind) -> Result<Box<dyn PipelineTask>, ServiceError> {
        match kind {
            TurnKind::Hotel { message, history } => {
                let message = require_text(message, "message")?;
                Ok(Box::new(
                    SearchRecommendTask::new(self.gateway.clone(), self.settings.clone(), message)
                        .with_history(history),
                ))
            }
            TurnKind::Chat {
                messages,
                system_prompt,
                model,
            } => {
                let has_user_turn = messages
                    .iter()
                    .any(|m| m.role == ChatRole::User && m.has_payload());
                if !has_user_turn {
                    return Err(ServiceError::InvalidRequest(
                        "messages must contain a user message".to_string(),
                    ));
                }
                let mut task =
                    ChatTask::new(self.gateway.clone(), self.settings.clone(), messages);
                if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
                    task = task.with_system_prompt(prompt);
                }
                if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
                    task = task.with_model(model);
                }
                Ok(Box::new(task))
            }
            TurnKind::Plan { message, draft } => {
                let message = require_text(message, "message")?;
                let draft = Draft::rehydrate(self.plan_schema.clone(), &draft)?;
                Ok(Box::new(TravelPlanTask::new(
                    self.gateway.clone(),
                    self.settings.clone(),
                    message,
                    Some(draft),
                )))
            }
        }
    }
}

fn require_text(text: String, field: &str) -> Result<String, ServiceError> {
    if text.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(text)
}
