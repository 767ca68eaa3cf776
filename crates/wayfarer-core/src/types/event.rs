//! Stream event definitions
//!
//! Every state transition of a pipeline run, and every chunk of streamed
//! synthesis, is reported as one `StreamEvent`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::step::StepRecord;

/// Kind of an incrementally streamed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Model "thinking" output
    Reasoning,
    /// Plain answer text
    Content,
    /// Recommendation text produced by a synthesis step
    Recommendation,
    /// Part of a structured document delivered in pieces
    JsonFragment,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Reasoning => "reasoning",
            ChunkKind::Content => "content",
            ChunkKind::Recommendation => "recommendation",
            ChunkKind::JsonFragment => "json_fragment",
        }
    }
}

/// Label of a structured result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Search items found for the recommendation step
    HotelsData,
    /// Updated travel draft that still misses required fields
    DraftUpdate,
    /// Finalized travel plan
    TravelPlan,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::HotelsData => "hotels_data",
            ResultKind::DraftUpdate => "draft_update",
            ResultKind::TravelPlan => "travel_plan",
        }
    }
}

/// Event produced by a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    StepUpdate(StepRecord),
    /// Opening marker of a multi-chunk synthesis
    ChunkStart(ChunkKind),
    Chunk {
        kind: ChunkKind,
        content: String,
    },
    /// Closing marker of a multi-chunk synthesis
    ChunkEnd(ChunkKind),
    FinalResponse(String),
    /// Non-fatal clarification request
    Ask {
        message: String,
        missing: Vec<String>,
    },
    StructuredResult {
        kind: ResultKind,
        value: Value,
    },
    /// Terminal failure
    Error(String),
    /// Terminal success
    Done,
}

impl StreamEvent {
    /// `Done` and `Error` end a run; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }

    /// Events that answer the user turn; a run carries at most one.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            StreamEvent::FinalResponse(_)
                | StreamEvent::Ask { .. }
                | StreamEvent::StructuredResult { .. }
        )
    }
}
