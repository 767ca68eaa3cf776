//! Wire projection of pipeline events.
//!
//! Every event becomes one JSON object with a `type` discriminator. The
//! projection is the stable client contract; internal enums may change
//! without touching it.

use serde_json::{json, Value};

use wayfarer_core::types::{ChunkKind, StreamEvent};

/// Wire `type` of a chunk of the given kind.
pub fn chunk_type(kind: ChunkKind) -> &'static str {
    match kind {
        ChunkKind::Reasoning => "reasoning",
        ChunkKind::Content => "content",
        ChunkKind::Recommendation => "recommendation_chunk",
        ChunkKind::JsonFragment => "json_fragment",
    }
}

pub fn event_to_json(event: &StreamEvent) -> Value {
    match event {
        StreamEvent::StepUpdate(step) => {
            let mut value = json!({
                "type": "step",
                "step": step.ordinal,
                "name": step.name,
                "status": step.status.as_str(),
                "message": step.message,
            });
            if let Some(data) = &step.data {
                value["data"] = data.clone();
            }
            value
        }
        StreamEvent::ChunkStart(kind) => json!({
            "type": format!("{}_start", kind.as_str()),
        }),
        StreamEvent::Chunk { kind, content } => json!({
            "type": chunk_type(*kind),
            "content": content,
        }),
        StreamEvent::ChunkEnd(kind) => json!({
            "type": format!("{}_end", kind.as_str()),
        }),
        StreamEvent::FinalResponse(content) => json!({
            "type": "final_response",
            "content": content,
        }),
        StreamEvent::Ask { message, missing } => json!({
            "type": "ask",
            "content": message,
            "missing": missing,
        }),
        StreamEvent::StructuredResult { kind, value } => json!({
            "type": kind.as_str(),
            "data": value,
        }),
        StreamEvent::Error(content) => json!({
            "type": "error",
            "content": content,
        }),
        StreamEvent::Done => json!({ "type": "done" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::types::{ResultKind, StepRecord, StepStatus};

    #[test]
    fn test_step_projection_omits_absent_data() {
        let mut step = StepRecord::pending(2, "invoke-search", "Searching hotels in Chengdu...");
        step.status = StepStatus::Running;
        assert_eq!(
            event_to_json(&StreamEvent::StepUpdate(step.clone())),
            json!({
                "type": "step",
                "step": 2,
                "name": "invoke-search",
                "status": "running",
                "message": "Searching hotels in Chengdu..."
            })
        );

        step.status = StepStatus::Completed;
        step.data = Some(json!({"count": 3}));
        let value = event_to_json(&StreamEvent::StepUpdate(step));
        assert_eq!(value["status"], "completed");
        assert_eq!(value["data"], json!({"count": 3}));
    }

    #[test]
    fn test_chunk_projection_names() {
        assert_eq!(
            event_to_json(&StreamEvent::ChunkStart(ChunkKind::Recommendation)),
            json!({"type": "recommendation_start"})
        );
        assert_eq!(
            event_to_json(&StreamEvent::Chunk {
                kind: ChunkKind::Recommendation,
                content: "Try Hotel A".to_string()
            }),
            json!({"type": "recommendation_chunk", "content": "Try Hotel A"})
        );
        assert_eq!(
            event_to_json(&StreamEvent::ChunkEnd(ChunkKind::Recommendation)),
            json!({"type": "recommendation_end"})
        );
        assert_eq!(chunk_type(ChunkKind::Reasoning), "reasoning");
    }

    #[test]
    fn test_result_projection_uses_kind_as_type() {
        let value = event_to_json(&StreamEvent::StructuredResult {
            kind: ResultKind::HotelsData,
            value: json!([{"name": "A"}]),
        });
        assert_eq!(value, json!({"type": "hotels_data", "data": [{"name": "A"}]}));

        let ask = event_to_json(&StreamEvent::Ask {
            message: "Where to?".to_string(),
            missing: vec!["destination".to_string()],
        });
        assert_eq!(
            ask,
            json!({"type": "ask", "content": "Where to?", "missing": ["destination"]})
        );
        assert_eq!(event_to_json(&StreamEvent::Done), json!({"type": "done"}));
    }
}
