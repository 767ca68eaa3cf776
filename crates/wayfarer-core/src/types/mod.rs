//! Core type definitions for wayfarer
//!
//! - Step: one named unit of work in a pipeline run, with its status lifecycle
//! - StreamEvent: what a pipeline run reports to its client

mod event;
mod step;

pub use event::{ChunkKind, ResultKind, StreamEvent};
pub use step::{StepRecord, StepStatus};
