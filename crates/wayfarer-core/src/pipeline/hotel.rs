//! Search-and-recommend task.
//!
//! classify-intent -> validate-params -> invoke-search -> synthesize-recommendation
//!
//! The search capability is only invoked when classification confirmed an
//! action. Unconfirmed turns are answered conversationally instead.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::prompts::{
    recommend_user_prompt, CLASSIFY_SYSTEM_PROMPT, RECOMMEND_SYSTEM_PROMPT, REPLY_SYSTEM_PROMPT,
};
use super::{
    report_capability_failure, truncate_for_log, PipelineError, PipelineRun, PipelineTask,
    TaskSettings,
};
use crate::extract::{extract_traced, ExtractionResult, RecoveryLayer};
use crate::gateway::{
    CapabilityGateway, ChatMessage, DeltaKind, GenerationRequest, SearchParams,
};
use crate::types::{ChunkKind, ResultKind};

/// Intent label that may open the action gate
pub const ACTION_INTENT: &str = "book_hotel";

const STEP_CLASSIFY: &str = "classify-intent";
const STEP_VALIDATE: &str = "validate-params";
const STEP_SEARCH: &str = "invoke-search";
const STEP_SYNTHESIZE: &str = "synthesize-recommendation";
const STEP_REPLY: &str = "reply";

const ASK_DESTINATION: &str =
    "Which city or area would you like to stay in? Let me know your dates too if you have them.";
const NO_RESULTS: &str =
    "I couldn't find any hotels matching your request. Try different dates or a nearby area.";

/// Outcome of the classify-intent step
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: String,
    /// Whether the action gate is open
    pub confirmed: bool,
    pub params: Map<String, Value>,
    pub message: Option<String>,
}

impl Classification {
    /// Plain conversation, gate closed.
    pub fn chat() -> Self {
        Self {
            intent: "chat".to_string(),
            confirmed: false,
            params: Map::new(),
            message: None,
        }
    }

    /// Read a classification from extracted model output.
    ///
    /// An explicit `confirmed` flag wins. Without one the gate opens only
    /// for the action intent. Unstructured output is treated as chat.
    pub fn from_extraction(result: &ExtractionResult) -> Self {
        let Some(value) = result.as_structured() else {
            return Self::chat();
        };
        let intent = value
            .get("intent")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|intent| !intent.is_empty())
            .unwrap_or("chat")
            .to_string();
        let confirmed = value
            .get("confirmed")
            .and_then(Value::as_bool)
            .unwrap_or(intent == ACTION_INTENT);
        Self {
            confirmed,
            params: value
                .get("params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            intent,
        }
    }

    pub fn is_action(&self) -> bool {
        self.intent == ACTION_INTENT
    }

    pub fn to_value(&self) -> Value {
        json!({
            "intent": self.intent,
            "confirmed": self.confirmed,
            "params": self.params,
            "message": self.message,
        })
    }
}

/// Classify a message, search when confirmed and stream a recommendation
pub struct SearchRecommendTask {
    gateway: CapabilityGateway,
    settings: TaskSettings,
    message: String,
    history: Vec<ChatMessage>,
}

impl SearchRecommendTask {
    pub fn new(gateway: CapabilityGateway, settings: TaskSettings, message: impl Into<String>) -> Self {
        Self {
            gateway,
            settings,
            message: message.into(),
            history: Vec::new(),
        }
    }

    /// Earlier turns passed along to the conversational reply.
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    async fn classify(&self, run: &mut PipelineRun) -> Result<Option<Classification>, PipelineError> {
        run.start_step(STEP_CLASSIFY, "Understanding your request...")
            .await?;
        let request = GenerationRequest::new(vec![
            ChatMessage::system(CLASSIFY_SYSTEM_PROMPT),
            ChatMessage::user(self.message.clone()),
        ])
        .with_temperature(self.settings.classify_temperature)
        .with_max_tokens(self.settings.max_tokens);

        let raw = match self.gateway.generate(request).await {
            Ok(raw) => raw,
            Err(err) => {
                report_capability_failure(
                    run,
                    format!("Could not analyse the request: {}", err),
                    format!("Sorry, I could not understand your request right now ({}).", err),
                )
                .await?;
                return Ok(None);
            }
        };
        let (extraction, layer) = extract_traced(&raw);
        debug!(
            layer = layer.map(RecoveryLayer::as_str).unwrap_or("none"),
            output = %truncate_for_log(&raw, 400),
            "classification output"
        );
        let classification = Classification::from_extraction(&extraction);
        run.complete_step("Request understood", Some(classification.to_value()))
            .await?;
        Ok(Some(classification))
    }

    /// Answer without searching; the gate stayed closed.
    async fn answer_without_search(
        &self,
        run: &mut PipelineRun,
        classification: &Classification,
    ) -> Result<(), PipelineError> {
        if classification.is_action() {
            let text = match SearchParams::from_params(&classification.params) {
                Ok(params) => format!(
                    "Would you like me to search for hotels in {}? Just confirm and I'll start looking.",
                    params.destination
                ),
                Err(_) => "Would you like me to search for hotels? Tell me where and when you'd like to stay.".to_string(),
            };
            return run.respond(text).await;
        }

        run.start_step(STEP_REPLY, "Writing a reply...").await?;
        let mut messages = vec![ChatMessage::system(REPLY_SYSTEM_PROMPT)];
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.message.clone()));
        let request = GenerationRequest::new(messages)
            .with_temperature(self.settings.synthesis_temperature)
            .with_max_tokens(self.settings.max_tokens);

        match self.gateway.generate(request).await {
            Ok(reply) => {
                run.complete_step("Reply ready", None).await?;
                run.respond(reply.trim()).await
            }
            Err(err) => {
                report_capability_failure(
                    run,
                    format!("Could not write a reply: {}", err),
                    format!("Sorry, I ran into a problem answering that ({}).", err),
                )
                .await
            }
        }
    }

    async fn synthesize(
        &self,
        run: &mut PipelineRun,
        params: &SearchParams,
        items: &[Value],
    ) -> Result<(), PipelineError> {
        run.start_step(STEP_SYNTHESIZE, "Preparing recommendations...")
            .await?;
        let request = GenerationRequest::new(vec![
            ChatMessage::system(RECOMMEND_SYSTEM_PROMPT),
            ChatMessage::user(recommend_user_prompt(params, items)),
        ])
        .with_temperature(self.settings.synthesis_temperature)
        .with_max_tokens(self.settings.max_tokens);

        let mut stream = match self.gateway.generate_stream(request).await {
            Ok(stream) => stream,
            Err(err) => {
                // hotels_data was already delivered; the failed step is the only report
                return run
                    .fail_step(format!("Could not generate recommendations: {}", err))
                    .await;
            }
        };

        run.chunk_start(ChunkKind::Recommendation).await?;
        let mut delivered = 0usize;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) if chunk.kind == DeltaKind::Content && !chunk.text.is_empty() => {
                    delivered += chunk.text.len();
                    run.chunk(ChunkKind::Recommendation, chunk.text).await?;
                }
                Ok(_) => {}
                Err(err) => {
                    let message = format!("Recommendation stream failed: {}", err);
                    run.fail_step(message.clone()).await?;
                    return run.abort(message).await;
                }
            }
        }
        run.chunk_end(ChunkKind::Recommendation).await?;
        debug!(bytes = delivered, "recommendation streamed");
        run.complete_step("Recommendations ready", None).await
    }
}

#[async_trait]
impl PipelineTask for SearchRecommendTask {
    fn name(&self) -> &'static str {
        "search_recommend"
    }

    async fn execute(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
        let Some(classification) = self.classify(run).await? else {
            return Ok(());
        };

        if !classification.confirmed {
            return self.answer_without_search(run, &classification).await;
        }
        if !classification.is_action() {
            warn!(intent = %classification.intent, "action confirmed for a non-action intent, proceeding");
        }

        run.start_step(STEP_VALIDATE, "Checking search details...")
            .await?;
        let params = match SearchParams::from_params(&classification.params) {
            Ok(params) => params,
            Err(missing) => {
                run.complete_step(
                    "More information is needed before searching",
                    Some(json!({ "missing": missing })),
                )
                .await?;
                return run.ask(ASK_DESTINATION, missing).await;
            }
        };
        run.complete_step("Search details ready", serde_json::to_value(&params).ok())
            .await?;

        run.start_step(
            STEP_SEARCH,
            format!("Searching hotels in {}...", params.destination),
        )
        .await?;
        let outcome = match self.gateway.search(params.clone()).await {
            Ok(outcome) if outcome.success => outcome,
            Ok(outcome) => {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "unknown search error".to_string());
                let reply = format!("Sorry, the hotel search failed: {}", reason);
                return report_capability_failure(run, reason, reply).await;
            }
            Err(err) => {
                let reason = err.to_string();
                let reply = format!("Sorry, the hotel search failed: {}", reason);
                return report_capability_failure(run, reason, reply).await;
            }
        };

        let total = outcome.items.len();
        let items: Vec<Value> = outcome
            .items
            .into_iter()
            .take(self.settings.max_search_items)
            .collect();
        run.complete_step(
            format!("Found {} hotels", total),
            Some(json!({ "count": total })),
        )
        .await?;
        if items.is_empty() {
            return run.respond(NO_RESULTS).await;
        }
        run.structured(ResultKind::HotelsData, Value::Array(items.clone()))
            .await?;

        self.synthesize(run, &params, &items).await
    }
}
