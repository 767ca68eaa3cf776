//! Travel-plan slot filling.
//!
//! Each turn extracts trip details, merges them into the client's draft and
//! either asks for the next missing field or, once the draft is complete,
//! generates an itinerary and locates its places. The itinerary document is
//! streamed to the client as `json_fragment` chunks while it is generated.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::prompts::{
    extract_details_user_prompt, plan_user_prompt, EXTRACT_DETAILS_SYSTEM_PROMPT,
    PLAN_SYSTEM_PROMPT,
};
use super::{
    report_capability_failure, truncate_for_log, PipelineError, PipelineRun, PipelineTask,
    TaskSettings,
};
use crate::draft::{clear_optional, merge, Draft, DraftSchema};
use crate::extract::{extract_traced, RecoveryLayer};
use crate::gateway::{
    CapabilityGateway, ChatMessage, Coordinates, DeltaKind, GenerationRequest,
};
use crate::types::{ChunkKind, ResultKind};

const STEP_EXTRACT: &str = "extract-details";
const STEP_MERGE: &str = "merge-draft";
const STEP_PLAN: &str = "generate-plan";
const STEP_LOCATE: &str = "locate-places";

/// Question asking the traveller for `field`.
pub fn question_for(field: &str) -> String {
    match field {
        "destination" => "Where would you like to go?".to_string(),
        "origin" => "Where will you be travelling from?".to_string(),
        "start_date" => "What date do you plan to leave? (YYYY-MM-DD)".to_string(),
        "end_date" => "When will you come back? (YYYY-MM-DD)".to_string(),
        "people" => "How many people are travelling?".to_string(),
        "attractions" => "Are there any places you definitely want to visit?".to_string(),
        other => format!("Could you tell me the {}?", other.replace('_', " ")),
    }
}

/// Field updates and clear requests read from the extraction output
#[derive(Debug, Default, PartialEq)]
struct DetailUpdates {
    updates: Map<String, Value>,
    clear: Vec<String>,
}

impl DetailUpdates {
    /// Accepts `{"updates": {...}, "clear": [...]}` or a flat field object.
    fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let clear = object
            .get("clear")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let updates = match object.get("updates").and_then(Value::as_object) {
            Some(updates) => updates.clone(),
            None => object
                .iter()
                .filter(|(key, _)| key.as_str() != "clear")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };
        Self { updates, clear }
    }
}

/// Collect, confirm and finally plan a trip
pub struct TravelPlanTask {
    gateway: CapabilityGateway,
    settings: TaskSettings,
    schema: Arc<DraftSchema>,
    message: String,
    draft: Draft,
}

impl TravelPlanTask {
    /// `draft` is the client-held state, `None` on the first turn.
    pub fn new(
        gateway: CapabilityGateway,
        settings: TaskSettings,
        message: impl Into<String>,
        draft: Option<Draft>,
    ) -> Self {
        let schema = Arc::new(DraftSchema::travel_plan());
        let draft = draft.unwrap_or_else(|| Draft::empty(schema.clone()));
        Self {
            gateway,
            settings,
            schema,
            message: message.into(),
            draft,
        }
    }

    pub fn schema(&self) -> Arc<DraftSchema> {
        self.schema.clone()
    }

    async fn extract_details(
        &self,
        run: &mut PipelineRun,
    ) -> Result<Option<DetailUpdates>, PipelineError> {
        run.start_step(STEP_EXTRACT, "Reading your trip details...")
            .await?;
        let request = GenerationRequest::new(vec![
            ChatMessage::system(EXTRACT_DETAILS_SYSTEM_PROMPT),
            ChatMessage::user(extract_details_user_prompt(
                &self.draft.to_value(),
                &self.message,
            )),
        ])
        .with_temperature(self.settings.classify_temperature)
        .with_max_tokens(self.settings.max_tokens);

        let raw = match self.gateway.generate(request).await {
            Ok(raw) => raw,
            Err(err) => {
                report_capability_failure(
                    run,
                    format!("Could not read the trip details: {}", err),
                    format!("Sorry, I could not process that message ({}).", err),
                )
                .await?;
                return Ok(None);
            }
        };
        let (extraction, layer) = extract_traced(&raw);
        debug!(
            layer = layer.map(RecoveryLayer::as_str).unwrap_or("none"),
            output = %truncate_for_log(&raw, 400),
            "detail extraction output"
        );
        let details = extraction
            .as_structured()
            .map(DetailUpdates::from_value)
            .unwrap_or_default();
        run.complete_step(
            "Trip details read",
            Some(json!({ "updates": details.updates, "clear": details.clear })),
        )
        .await?;
        Ok(Some(details))
    }

    fn apply(&self, details: &DetailUpdates) -> Draft {
        let mut next = merge(&self.draft, &details.updates);
        for field in &details.clear {
            match clear_optional(&next, std::slice::from_ref(field)) {
                Ok(cleared) => next = cleared,
                Err(err) => warn!(error = %err, "ignoring clear request"),
            }
        }
        next
    }

    async fn generate_plan(
        &self,
        run: &mut PipelineRun,
        draft: &Draft,
    ) -> Result<Option<Value>, PipelineError> {
        let destination = draft.get_str("destination").unwrap_or("your destination");
        run.start_step(STEP_PLAN, format!("Planning your trip to {}...", destination))
            .await?;
        let request = GenerationRequest::new(vec![
            ChatMessage::system(PLAN_SYSTEM_PROMPT),
            ChatMessage::user(plan_user_prompt(&draft.to_value())),
        ])
        .with_temperature(self.settings.synthesis_temperature)
        .with_max_tokens(self.settings.max_tokens);

        let mut stream = match self.gateway.generate_stream(request).await {
            Ok(stream) => stream,
            Err(err) => {
                report_capability_failure(
                    run,
                    format!("Could not generate the plan: {}", err),
                    format!("Sorry, I could not put the plan together ({}).", err),
                )
                .await?;
                return Ok(None);
            }
        };

        run.chunk_start(ChunkKind::JsonFragment).await?;
        let mut raw = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) if chunk.kind == DeltaKind::Content && !chunk.text.is_empty() => {
                    raw.push_str(&chunk.text);
                    run.chunk(ChunkKind::JsonFragment, chunk.text).await?;
                }
                Ok(_) => {}
                Err(err) => {
                    let message = format!("Plan stream failed: {}", err);
                    run.fail_step(message.clone()).await?;
                    run.abort(message).await?;
                    return Ok(None);
                }
            }
        }
        run.chunk_end(ChunkKind::JsonFragment).await?;

        let (extraction, _) = extract_traced(&raw);
        match extraction.into_structured() {
            Some(plan) => {
                let days = plan
                    .get("days")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or_default();
                run.complete_step(format!("Planned {} days", days), None)
                    .await?;
                Ok(Some(plan))
            }
            None => {
                warn!(output = %truncate_for_log(&raw, 400), "plan output was not structured");
                report_capability_failure(
                    run,
                    "The generated plan could not be read",
                    "Sorry, I could not put the plan together. Please try again.",
                )
                .await?;
                Ok(None)
            }
        }
    }

    /// Geocode every itinerary place and route between neighbours in a day.
    async fn locate_places(
        &self,
        run: &mut PipelineRun,
        draft: &Draft,
        plan: &Value,
    ) -> Result<(Map<String, Value>, Vec<Value>), PipelineError> {
        run.start_step(STEP_LOCATE, "Finding places on the map...")
            .await?;
        let city = draft.get_str("destination");
        let mut cache: HashMap<String, Option<Coordinates>> = HashMap::new();
        let mut coords = Map::new();
        let mut routes = Vec::new();

        for (day_index, day) in itinerary_places(plan).into_iter().enumerate() {
            let mut previous: Option<(String, Coordinates)> = None;
            for name in day {
                let located = match cache.get(&name) {
                    Some(found) => *found,
                    None => {
                        let found = self.gateway.geocode(&name, city).await;
                        cache.insert(name.clone(), found);
                        found
                    }
                };
                let Some(point) = located else {
                    debug!(place = %name, "place not located");
                    continue;
                };
                coords.insert(name.clone(), json!(point));
                if let Some((from_name, from)) = previous.take() {
                    if let Some(route) = self
                        .gateway
                        .route(from, point, self.settings.travel_mode)
                        .await
                    {
                        routes.push(json!({
                            "day": day_index + 1,
                            "from": from_name,
                            "to": name,
                            "mode": self.settings.travel_mode,
                            "route": route,
                        }));
                    }
                }
                previous = Some((name, point));
            }
        }

        run.complete_step(
            format!("Located {} of {} places", coords.len(), cache.len()),
            Some(json!({ "located": coords.len(), "routes": routes.len() })),
        )
        .await?;
        Ok((coords, routes))
    }
}

/// Place names per day, in itinerary order.
fn itinerary_places(plan: &Value) -> Vec<Vec<String>> {
    let Some(days) = plan.get("days").and_then(Value::as_array) else {
        return Vec::new();
    };
    days.iter()
        .map(|day| {
            day.get("items")
                .or_else(|| day.get("activities"))
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(place_name).collect())
                .unwrap_or_default()
        })
        .collect()
}

fn place_name(item: &Value) -> Option<String> {
    let name = match item {
        Value::String(name) => name.as_str(),
        Value::Object(fields) => fields
            .get("name")
            .or_else(|| fields.get("place"))
            .and_then(Value::as_str)?,
        _ => return None,
    };
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[async_trait]
impl PipelineTask for TravelPlanTask {
    fn name(&self) -> &'static str {
        "travel_plan"
    }

    async fn execute(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
        let Some(details) = self.extract_details(run).await? else {
            return Ok(());
        };

        run.start_step(STEP_MERGE, "Updating your trip...").await?;
        let draft = self.apply(&details);
        let missing = draft.missing_required();
        run.complete_step(
            if missing.is_empty() {
                "All trip details collected".to_string()
            } else {
                format!("Still missing: {}", missing.join(", "))
            },
            Some(draft.to_value()),
        )
        .await?;

        if let Some(first_missing) = missing.first() {
            let next_prompt = question_for(first_missing);
            return run
                .structured(
                    ResultKind::DraftUpdate,
                    json!({
                        "draft": draft.to_value(),
                        "missing": missing,
                        "complete": false,
                        "next_prompt": next_prompt,
                    }),
                )
                .await;
        }

        let Some(plan) = self.generate_plan(run, &draft).await? else {
            return Ok(());
        };
        let (coords, routes) = self.locate_places(run, &draft, &plan).await?;
        run.structured(
            ResultKind::TravelPlan,
            json!({
                "draft": draft.to_value(),
                "plan": plan,
                "coords": coords,
                "routes": routes,
            }),
        )
        .await
    }
}
