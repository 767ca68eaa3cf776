//! # Wayfarer Runtime
//!
//! Glue between the pipeline and a transport:
//! - [`TurnService`] validates a turn, starts its run and hands back frames
//! - [`EventEmitter`] frames events with keep-alives and a guaranteed terminal frame
//! - [`event_to_json`] is the wire projection of every event
//! - [`init_tracing`] installs the process-wide subscriber

mod bootstrap;
mod emitter;
mod gate;
mod projection;
mod service;

pub use bootstrap::init_tracing;
pub use emitter::{EventEmitter, Frame, FrameStream};
pub use projection::{chunk_type, event_to_json};
pub use service::{ServiceError, TurnKind, TurnRequest, TurnService};
