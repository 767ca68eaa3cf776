//! OpenAI-compatible chat completion client.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use wayfarer_core::gateway::{
    CapabilityError, ChatMessage, ChatRole, GenerationRequest, TextChunk, TextChunkStream,
    TextGenerator,
};

use crate::ProviderError;

/// Configuration for the HTTP text generator
#[derive(Debug, Clone)]
pub struct HttpTextGeneratorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub connect_timeout_secs: u64,
    pub extra_headers: HeaderMap,
}

impl Default for HttpTextGeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            connect_timeout_secs: 10,
            extra_headers: HeaderMap::new(),
        }
    }
}

/// Text generator over an OpenAI-compatible API
pub struct HttpTextGenerator {
    client: reqwest::Client,
    config: HttpTextGeneratorConfig,
}

impl HttpTextGenerator {
    pub fn new(config: HttpTextGeneratorConfig) -> Result<Self, ProviderError> {
        // Only connecting is bounded here; the gateway times every wait.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn headers(&self) -> Result<HeaderMap, CapabilityError> {
        let mut headers = self.config.extra_headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|e| CapabilityError::Http(e.to_string()))?,
            );
        }
        Ok(headers)
    }

    async fn send(
        &self,
        request: GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, CapabilityError> {
        let model = request.model.as_deref().unwrap_or(&self.config.model);
        let body = ChatRequest {
            model,
            messages: request.messages.iter().map(OutboundMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };
        debug!(
            model = %model,
            messages = request.messages.len(),
            stream,
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Response(format!("HTTP {}: {}", status, text)));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OutboundMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// Message as the completion API takes it. Text-only messages keep the
/// plain string form; messages with images switch to typed parts.
#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    role: ChatRole,
    content: OutboundContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OutboundContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

impl<'a> From<&'a ChatMessage> for OutboundMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        let content = if message.images.is_empty() {
            OutboundContent::Text(&message.content)
        } else {
            let text = Some(message.content.as_str())
                .filter(|text| !text.trim().is_empty())
                .map(|text| ContentPart::Text { text });
            let images = message.images.iter().map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl { url },
            });
            OutboundContent::Parts(text.into_iter().chain(images).collect())
        };
        Self {
            role: message.role,
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError> {
        let response = self.send(request, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| CapabilityError::Http(e.to_string()))?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| CapabilityError::Serialization(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CapabilityError::Response("Missing choices".to_string()))
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<TextChunkStream, CapabilityError> {
        let response = self.send(request, true).await?;
        let mut body = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut decoder = SseDeltaDecoder::default();
            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        yield Err(CapabilityError::Http(err.to_string()));
                        return;
                    }
                };
                match decoder.push(&bytes) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
                if decoder.is_done() {
                    return;
                }
            }
        }))
    }
}

/// Incremental decoder for `data:` lines of a streamed chat completion.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence;
/// only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDeltaDecoder {
    pending: Vec<u8>,
    done: bool,
}

impl SseDeltaDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<TextChunk>, CapabilityError> {
        self.pending.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            self.decode_line(line.trim(), &mut chunks)?;
        }
        Ok(chunks)
    }

    /// Whether the `[DONE]` sentinel was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, line: &str, out: &mut Vec<TextChunk>) -> Result<(), CapabilityError> {
        let Some(payload) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(());
        }
        if payload == "[DONE]" {
            self.done = true;
            return Ok(());
        }
        let frame: StreamFrame = serde_json::from_str(payload)
            .map_err(|e| CapabilityError::Serialization(e.to_string()))?;
        for choice in frame.choices {
            if let Some(reasoning) = choice.delta.reasoning_content.filter(|t| !t.is_empty()) {
                out.push(TextChunk::reasoning(reasoning));
            }
            if let Some(content) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push(TextChunk::content(content));
            }
        }
        Ok(())
    }
}
