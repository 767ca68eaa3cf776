use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use async_stream::stream;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use wayfarer_config::load_config;
use wayfarer_core::gateway::{ChatMessage, ChatRole};
use wayfarer_runtime::{
    init_tracing, Frame, FrameStream, ServiceError, TurnKind, TurnRequest, TurnService,
};

#[derive(Clone)]
struct AppState {
    service: TurnService,
}

#[derive(Debug, Deserialize)]
struct HotelChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<WireMessage>,
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<WireMessage>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TravelPlanRequest {
    message: String,
    #[serde(default)]
    draft: Value,
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Message as clients send it: plain text, or a list of typed `text` and
/// `image_url` parts.
#[derive(Debug, Deserialize)]
struct WireMessage {
    role: ChatRole,
    content: WireContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image_url: Option<WireImage>,
}

#[derive(Debug, Deserialize)]
struct WireImage {
    url: String,
}

impl TryFrom<WireMessage> for ChatMessage {
    type Error = String;

    fn try_from(message: WireMessage) -> Result<Self, Self::Error> {
        let parts = match message.content {
            WireContent::Text(text) => {
                return Ok(ChatMessage {
                    role: message.role,
                    content: text,
                    images: Vec::new(),
                })
            }
            WireContent::Parts(parts) => parts,
        };
        let mut texts = Vec::new();
        let mut images = Vec::new();
        for part in parts {
            match (part.kind.as_str(), part.text, part.image_url) {
                ("text", Some(text), _) => texts.push(text),
                ("image_url", _, Some(image)) if !image.url.trim().is_empty() => {
                    images.push(image.url)
                }
                ("text", None, _) => return Err("text part without text".to_string()),
                ("image_url", _, _) => return Err("image_url part without url".to_string()),
                (other, _, _) => return Err(format!("unsupported content part '{}'", other)),
            }
        }
        Ok(ChatMessage {
            role: message.role,
            content: texts.join("\n"),
            images,
        })
    }
}

fn chat_messages(messages: Vec<WireMessage>) -> Result<Vec<ChatMessage>, ApiError> {
    messages
        .into_iter()
        .map(ChatMessage::try_from)
        .collect::<Result<_, _>>()
        .map_err(|message| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    code: "invalid_argument".to_string(),
                    message,
                }),
            )
        })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub async fn run_server(config: PathBuf, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let config = load_config(&config)
        .with_context(|| format!("load config '{}' failed", config.display()))?;
    init_tracing(&config.observability);

    let listen = match listen {
        Some(addr) => addr,
        None => config
            .server
            .listen
            .parse()
            .with_context(|| format!("invalid server.listen '{}'", config.server.listen))?,
    };
    let service = TurnService::from_config(&config).context("build capability gateway failed")?;
    let app = build_router(service, &config.server.allowed_origins);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind server listener failed")?;
    println!("listening on http://{}", listen);
    tracing::info!(%listen, app = %config.app.name, "wayfarer server started");
    axum::serve(listener, app)
        .await
        .context("wayfarer server exited with error")?;
    Ok(())
}

/// Routes of the HTTP surface; `allowed_origins` empty means any origin.
pub fn build_router(service: TurnService, allowed_origins: &[String]) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/hotel-chat", post(hotel_chat))
        .route("/api/travel-plan", post(travel_plan))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return base.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let Json(req) = payload.map_err(map_rejection)?;
    let request = with_conversation(
        TurnRequest::new(TurnKind::Chat {
            messages: chat_messages(req.messages)?,
            system_prompt: req.system_prompt,
            model: req.model,
        }),
        req.conversation_id,
    );
    start_turn(&state, request)
}

async fn hotel_chat(
    State(state): State<AppState>,
    payload: Result<Json<HotelChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let Json(req) = payload.map_err(map_rejection)?;
    let request = with_conversation(
        TurnRequest::new(TurnKind::Hotel {
            message: req.message,
            history: chat_messages(req.history)?,
        }),
        req.conversation_id,
    );
    start_turn(&state, request)
}

async fn travel_plan(
    State(state): State<AppState>,
    payload: Result<Json<TravelPlanRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let Json(req) = payload.map_err(map_rejection)?;
    let request = with_conversation(
        TurnRequest::new(TurnKind::Plan {
            message: req.message,
            draft: req.draft,
        }),
        req.conversation_id,
    );
    start_turn(&state, request)
}

fn with_conversation(request: TurnRequest, conversation_id: Option<String>) -> TurnRequest {
    match conversation_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => request.in_conversation(id),
        None => request,
    }
}

fn start_turn(
    state: &AppState,
    request: TurnRequest,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let frames = state.service.start(request).map_err(map_service_error)?;
    Ok(Sse::new(sse_events(frames)))
}

fn sse_events(mut frames: FrameStream) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream! {
        while let Some(frame) = frames.next().await {
            let event = match frame {
                Frame::Event(value) => {
                    let payload = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
                    SseEvent::default().data(payload)
                }
                Frame::KeepAlive => SseEvent::default().comment("ping"),
            };
            yield Ok(event);
        }
    }
}

fn map_service_error(err: ServiceError) -> ApiError {
    let code = match err {
        ServiceError::InvalidRequest(_) => "invalid_argument",
        ServiceError::Draft(_) => "invalid_draft",
    };
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            code: code.to_string(),
            message: err.to_string(),
        }),
    )
}

fn map_rejection(rejection: JsonRejection) -> ApiError {
    (
        rejection.status(),
        Json(ErrorBody {
            code: "invalid_body".to_string(),
            message: rejection.body_text(),
        }),
    )
}
