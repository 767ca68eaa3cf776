//! Event emitter
//!
//! Turns the event channel of a pipeline run into transport frames. Frames
//! are produced in emission order, a keep-alive frame fills every silence
//! longer than the keep-alive interval, and the stream ends right after the
//! first terminal event. A producer that goes away without a terminal event
//! still gets one appended, so a client is never left waiting.

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use wayfarer_core::types::StreamEvent;

use crate::projection::event_to_json;

const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

/// One transport frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(Value),
    KeepAlive,
}

impl Frame {
    /// SSE text of the frame. JSON escapes newlines, so the payload never
    /// contains the blank-line delimiter.
    pub fn to_sse_text(&self) -> String {
        match self {
            Frame::Event(value) => {
                let data = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
                format!("data: {}\n\n", data)
            }
            Frame::KeepAlive => ": ping\n\n".to_string(),
        }
    }

    /// Wire `type` of an event frame.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            Frame::Event(value) => value.get("type").and_then(Value::as_str),
            Frame::KeepAlive => None,
        }
    }
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

#[derive(Debug, Clone)]
pub struct EventEmitter {
    keepalive: Duration,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_KEEPALIVE)
    }
}

impl EventEmitter {
    pub fn new(keepalive: Duration) -> Self {
        Self { keepalive }
    }

    pub fn keepalive(&self) -> Duration {
        self.keepalive
    }

    pub fn frames(&self, mut events: mpsc::Receiver<StreamEvent>) -> FrameStream {
        let keepalive = self.keepalive;
        Box::pin(async_stream::stream! {
            loop {
                match tokio::time::timeout(keepalive, events.recv()).await {
                    Err(_) => yield Frame::KeepAlive,
                    Ok(Some(event)) => {
                        let terminal = event.is_terminal();
                        yield Frame::Event(event_to_json(&event));
                        if terminal {
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!("event producer ended without a terminal event");
                        yield Frame::Event(event_to_json(&StreamEvent::Error(
                            "the response stream ended unexpectedly".to_string(),
                        )));
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn types(frames: &[Frame]) -> Vec<Option<&str>> {
        frames.iter().map(Frame::event_type).collect()
    }

    #[tokio::test]
    async fn test_frames_stop_after_terminal_event() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::FinalResponse("hi".to_string()))
            .await
            .expect("send");
        tx.send(StreamEvent::Done).await.expect("send");
        tx.send(StreamEvent::Error("late".to_string()))
            .await
            .expect("send");

        let frames: Vec<Frame> = EventEmitter::default().frames(rx).collect().await;
        assert_eq!(types(&frames), vec![Some("final_response"), Some("done")]);
    }

    #[test]
    fn test_missing_terminal_event_is_appended() {
        let frames: Vec<Frame> = tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(8);
            tx.send(StreamEvent::FinalResponse("hi".to_string()))
                .await
                .expect("send");
            drop(tx);
            EventEmitter::default().frames(rx).collect().await
        });
        assert_eq!(types(&frames), vec![Some("final_response"), Some("error")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_fills_silence() {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            let _ = tx.send(StreamEvent::Done).await;
        });

        let frames: Vec<Frame> = EventEmitter::new(Duration::from_secs(10))
            .frames(rx)
            .collect()
            .await;
        assert_eq!(
            frames,
            vec![
                Frame::KeepAlive,
                Frame::KeepAlive,
                Frame::Event(serde_json::json!({"type": "done"}))
            ]
        );
    }

    #[test]
    fn test_sse_text_keeps_newlines_inside_one_frame() {
        let frame = Frame::Event(event_to_json(&StreamEvent::Chunk {
            kind: wayfarer_core::types::ChunkKind::Content,
            content: "line one\n\nline two".to_string(),
        }));
        let text = frame.to_sse_text();
        assert_eq!(text.matches("\n\n").count(), 1);
        assert!(text.ends_with("\n\n"));
        assert!(text.starts_with("data: {"));
        assert_eq!(Frame::KeepAlive.to_sse_text(), ": ping\n\n");
    }
}
