//! Plain conversational turn streamed as reasoning and content chunks.

use async_trait::async_trait;
use futures_util::StreamExt;

use super::prompts::CHAT_SYSTEM_PROMPT;
use super::{PipelineError, PipelineRun, PipelineTask, TaskSettings};
use crate::gateway::{CapabilityGateway, ChatMessage, ChatRole, DeltaKind, GenerationRequest};
use crate::types::ChunkKind;

pub struct ChatTask {
    gateway: CapabilityGateway,
    settings: TaskSettings,
    messages: Vec<ChatMessage>,
    system_prompt: Option<String>,
    model: Option<String>,
}

impl ChatTask {
    pub fn new(gateway: CapabilityGateway, settings: TaskSettings, messages: Vec<ChatMessage>) -> Self {
        Self {
            gateway,
            settings,
            messages,
            system_prompt: None,
            model: None,
        }
    }

    /// Model to ask for instead of the provider default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn request(&self) -> GenerationRequest {
        let system = self
            .system_prompt
            .clone()
            .unwrap_or_else(|| CHAT_SYSTEM_PROMPT.to_string());
        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(
            self.messages
                .iter()
                .filter(|message| message.role != ChatRole::System)
                .cloned(),
        );
        GenerationRequest::new(messages)
            .with_model(self.model.clone())
            .with_temperature(self.settings.synthesis_temperature)
            .with_max_tokens(self.settings.max_tokens)
    }
}

#[async_trait]
impl PipelineTask for ChatTask {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn execute(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
        let mut stream = match self.gateway.generate_stream(self.request()).await {
            Ok(stream) => stream,
            Err(err) => return run.abort(format!("Failed to generate a response: {}", err)).await,
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) if chunk.text.is_empty() => {}
                Ok(chunk) => {
                    let kind = match chunk.kind {
                        DeltaKind::Reasoning => ChunkKind::Reasoning,
                        DeltaKind::Content => ChunkKind::Content,
                    };
                    run.chunk(kind, chunk.text).await?;
                }
                Err(err) => {
                    return run
                        .abort(format!("Response stream failed: {}", err))
                        .await
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::gateway::{CapabilityError, SearchOutcome, TextChunk};
    use crate::pipeline::testing::{collect_events, gateway, RecordingSearch, ScriptedText};
    use crate::pipeline::RunOutcome;
    use crate::types::StreamEvent;

    fn search() -> Arc<RecordingSearch> {
        Arc::new(RecordingSearch::new(Ok(SearchOutcome::found(Vec::new()))))
    }

    #[tokio::test]
    async fn test_chat_streams_reasoning_and_content() {
        let text = Arc::new(ScriptedText::new().stream(vec![
            Ok(TextChunk::reasoning("The user greets me.")),
            Ok(TextChunk::content("Hi")),
            Ok(TextChunk::content("")),
            Ok(TextChunk::content("!")),
        ]));
        let task = ChatTask::new(
            gateway(&text, &search()),
            TaskSettings::default(),
            vec![ChatMessage::user("hello")],
        );
        let (events, report) = collect_events(&task).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk {
                    kind: ChunkKind::Reasoning,
                    content: "The user greets me.".to_string()
                },
                StreamEvent::Chunk {
                    kind: ChunkKind::Content,
                    content: "Hi".to_string()
                },
                StreamEvent::Chunk {
                    kind: ChunkKind::Content,
                    content: "!".to_string()
                },
                StreamEvent::Done,
            ]
        );
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn test_chat_prepends_system_prompt() {
        let text = Arc::new(ScriptedText::new().stream(vec![Ok(TextChunk::content("ok"))]));
        let task = ChatTask::new(
            gateway(&text, &search()),
            TaskSettings::default(),
            vec![
                ChatMessage::system("ignored"),
                ChatMessage::user("hello"),
                ChatMessage::assistant("hi"),
                ChatMessage::user("plan a trip"),
            ],
        )
        .with_system_prompt("Be brief.");
        collect_events(&task).await;

        let requests = text.requests();
        assert_eq!(requests.len(), 1);
        let messages = &requests[0].messages;
        assert_eq!(messages[0], ChatMessage::system("Be brief."));
        assert_eq!(messages.len(), 4);
        assert_eq!(requests[0].temperature, Some(0.7));
    }

    #[tokio::test]
    async fn test_chat_forwards_images_and_model() {
        let text = Arc::new(ScriptedText::new().stream(vec![Ok(TextChunk::content("a cat"))]));
        let photo = ChatMessage::user("what is this?")
            .with_images(vec!["data:image/png;base64,AAAA".to_string()]);
        let task = ChatTask::new(
            gateway(&text, &search()),
            TaskSettings::default(),
            vec![photo.clone()],
        )
        .with_model("vision-pro");
        collect_events(&task).await;

        let requests = text.requests();
        assert_eq!(requests[0].model.as_deref(), Some("vision-pro"));
        assert_eq!(requests[0].messages[1], photo);
    }

    #[tokio::test]
    async fn test_chat_stream_failure_is_terminal_error() {
        let text = Arc::new(ScriptedText::new().stream(vec![
            Ok(TextChunk::content("partial")),
            Err(CapabilityError::timeout("text generation", std::time::Duration::from_secs(5))),
        ]));
        let task = ChatTask::new(
            gateway(&text, &search()),
            TaskSettings::default(),
            vec![ChatMessage::user("hello")],
        );
        let (events, report) = collect_events(&task).await;

        let message = "Response stream failed: text generation timed out after 5s".to_string();
        assert_eq!(events.last(), Some(&StreamEvent::Error(message.clone())));
        assert_eq!(events.len(), 2);
        assert_eq!(report.outcome, RunOutcome::Error(message));
    }

    #[tokio::test]
    async fn test_chat_open_failure_is_terminal_error() {
        let text = Arc::new(
            ScriptedText::new().stream_error(CapabilityError::Http("503".to_string())),
        );
        let task = ChatTask::new(
            gateway(&text, &search()),
            TaskSettings::default(),
            vec![ChatMessage::user("hello")],
        );
        let (events, _) = collect_events(&task).await;
        assert_eq!(
            events,
            vec![StreamEvent::Error(
                "Failed to generate a response: http error: 503".to_string()
            )]
        );
    }
}
