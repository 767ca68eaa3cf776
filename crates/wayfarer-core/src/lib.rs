//! # Wayfarer Core
//!
//! Core abstractions and deterministic logic for the wayfarer orchestrator.
//!
//! This crate contains:
//! - Step / StreamEvent definitions
//! - Structured output extraction from generated text
//! - Draft accumulation for multi-turn slot filling
//! - Capability gateway traits (text generation, search, location)
//! - The stage pipeline and the tasks built on it
//!
//! This crate does NOT care about:
//! - Which transport carries the events
//! - Which provider sits behind a capability
//! - How configuration is loaded

pub mod draft;
pub mod extract;
pub mod gateway;
pub mod pipeline;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::draft::{
        clear_optional, is_complete, merge, missing_required, Draft, DraftError, DraftSchema,
    };
    pub use crate::extract::{extract, extract_traced, ExtractionResult, RecoveryLayer};
    pub use crate::gateway::{
        CallTimeouts, CapabilityError, CapabilityGateway, ChatMessage, ChatRole, Coordinates,
        DeltaKind, GenerationRequest, LocationCapability, RouteStep, RouteSummary,
        SearchCapability, SearchOutcome, SearchParams, TextChunk, TextChunkStream, TextGenerator,
        TravelMode,
    };
    pub use crate::pipeline::{
        run_task, ChatTask, EventSink, PipelineError, PipelineRun, PipelineTask, RunOutcome,
        RunReport, SearchRecommendTask, TaskSettings, TravelPlanTask,
    };
    pub use crate::types::{ChunkKind, ResultKind, StepRecord, StepStatus, StreamEvent};
}

// Re-export key types at crate root
pub use draft::{Draft, DraftSchema};
pub use extract::{extract, ExtractionResult};
pub use gateway::{CapabilityError, CapabilityGateway};
pub use pipeline::{run_task, EventSink, PipelineRun, PipelineTask, RunReport};
pub use types::{ChunkKind, ResultKind, StepRecord, StepStatus, StreamEvent};
