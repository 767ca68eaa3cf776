//! Stage pipeline
//!
//! A pipeline run executes a fixed sequence of named steps for one user
//! turn and reports every transition as a [`StreamEvent`]:
//!
//! ```text
//! Idle -> Step[1] -> Step[2] -> ... -> Step[n] -> Terminal(Done)
//!           \________\__________________\_____-> Terminal(Error)
//! ```
//!
//! Steps run strictly one after another. A failed step halts the run: no
//! further step may start, only a response and the terminal event may
//! follow. Nothing is retried.
//!
//! Tasks implement [`PipelineTask`] and drive a [`PipelineRun`];
//! [`run_task`] guarantees the run always ends with exactly one terminal
//! event, even when the task itself returns an internal error.

mod chat;
mod hotel;
mod plan;
mod prompts;

#[cfg(test)]
mod testing;

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, Instrument};

use crate::gateway::TravelMode;
use crate::types::{ChunkKind, ResultKind, StepRecord, StepStatus, StreamEvent};

pub use chat::ChatTask;
pub use hotel::{Classification, SearchRecommendTask, ACTION_INTENT};
pub use plan::{question_for, TravelPlanTask};

/// Pipeline errors
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("event receiver disconnected")]
    Disconnected,
    #[error("step {ordinal} cannot move from {from} to {to}")]
    IllegalTransition {
        ordinal: u32,
        from: StepStatus,
        to: StepStatus,
    },
    #[error("step {ordinal} is still running")]
    StepInProgress { ordinal: u32 },
    #[error("no step is running")]
    NoActiveStep,
    #[error("run halted after a failed step")]
    Halted,
    #[error("run already emitted its terminal event")]
    Terminated,
    #[error("run already produced a response")]
    DuplicateResponse,
}

/// Sending half of a run's event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// Bounded channel; a slow client applies backpressure to the run.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: StreamEvent) -> Result<(), PipelineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PipelineError::Disconnected)
    }
}

/// Knobs shared by every task
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub classify_temperature: f32,
    pub synthesis_temperature: f32,
    pub max_tokens: Option<u32>,
    /// Upper bound on search items handed to synthesis and to the client
    pub max_search_items: usize,
    pub travel_mode: TravelMode,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            classify_temperature: 0.3,
            synthesis_temperature: 0.7,
            max_tokens: None,
            max_search_items: 20,
            travel_mode: TravelMode::Driving,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Done,
    Error(String),
    /// The client went away; no terminal event was delivered
    Disconnected,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub task: &'static str,
    pub steps: Vec<StepRecord>,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    /// No step running, next step may start
    Idle,
    Active(u32),
    /// A step failed; only a response and the terminal event may follow
    Halted,
    Finished,
}

/// One pipeline run for one user turn
pub struct PipelineRun {
    run_id: String,
    task: &'static str,
    steps: Vec<StepRecord>,
    state: RunState,
    responded: bool,
    outcome: Option<RunOutcome>,
    step_started: Option<Instant>,
    sink: EventSink,
}

impl PipelineRun {
    pub fn new(task: &'static str, sink: EventSink) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            task,
            steps: Vec::new(),
            state: RunState::Idle,
            responded: false,
            outcome: None,
            step_started: None,
            sink,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn is_finished(&self) -> bool {
        self.state == RunState::Finished
    }

    /// Record the next step and report it as running.
    pub async fn start_step(
        &mut self,
        name: &str,
        message: impl Into<String>,
    ) -> Result<u32, PipelineError> {
        match self.state {
            RunState::Idle => {}
            RunState::Active(ordinal) => return Err(PipelineError::StepInProgress { ordinal }),
            RunState::Halted => return Err(PipelineError::Halted),
            RunState::Finished => return Err(PipelineError::Terminated),
        }

        let ordinal = self.steps.len() as u32 + 1;
        let mut record = StepRecord::pending(ordinal, name, message);
        record
            .transition(StepStatus::Running)
            .map_err(|(from, to)| PipelineError::IllegalTransition { ordinal, from, to })?;
        debug!(ordinal, step = name, "step started");

        self.steps.push(record.clone());
        self.state = RunState::Active(ordinal);
        self.step_started = Some(Instant::now());
        self.send(StreamEvent::StepUpdate(record)).await?;
        Ok(ordinal)
    }

    pub async fn complete_step(
        &mut self,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Result<(), PipelineError> {
        self.finish_step(StepStatus::Completed, message.into(), data)
            .await
    }

    /// Mark the running step failed; the run halts.
    pub async fn fail_step(&mut self, message: impl Into<String>) -> Result<(), PipelineError> {
        self.finish_step(StepStatus::Error, message.into(), None).await
    }

    async fn finish_step(
        &mut self,
        status: StepStatus,
        message: String,
        data: Option<Value>,
    ) -> Result<(), PipelineError> {
        let ordinal = match self.state {
            RunState::Active(ordinal) => ordinal,
            RunState::Finished => return Err(PipelineError::Terminated),
            RunState::Idle | RunState::Halted => return Err(PipelineError::NoActiveStep),
        };
        let record = self
            .steps
            .last_mut()
            .filter(|record| record.ordinal == ordinal)
            .ok_or(PipelineError::NoActiveStep)?;
        record
            .transition(status)
            .map_err(|(from, to)| PipelineError::IllegalTransition { ordinal, from, to })?;
        record.message = message;
        record.data = data;
        let snapshot = record.clone();

        let elapsed_ms = self
            .step_started
            .take()
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or_default();
        if status == StepStatus::Error {
            info!(ordinal, step = %snapshot.name, elapsed_ms, message = %snapshot.message, "step failed");
            self.state = RunState::Halted;
        } else {
            info!(ordinal, step = %snapshot.name, elapsed_ms, "step completed");
            self.state = RunState::Idle;
        }
        self.send(StreamEvent::StepUpdate(snapshot)).await
    }

    pub async fn chunk_start(&mut self, kind: ChunkKind) -> Result<(), PipelineError> {
        self.ensure_streaming()?;
        self.send(StreamEvent::ChunkStart(kind)).await
    }

    pub async fn chunk(
        &mut self,
        kind: ChunkKind,
        content: impl Into<String>,
    ) -> Result<(), PipelineError> {
        self.ensure_streaming()?;
        self.send(StreamEvent::Chunk {
            kind,
            content: content.into(),
        })
        .await
    }

    pub async fn chunk_end(&mut self, kind: ChunkKind) -> Result<(), PipelineError> {
        self.ensure_streaming()?;
        self.send(StreamEvent::ChunkEnd(kind)).await
    }

    pub async fn respond(&mut self, text: impl Into<String>) -> Result<(), PipelineError> {
        self.send_response(StreamEvent::FinalResponse(text.into()))
            .await
    }

    pub async fn ask(
        &mut self,
        message: impl Into<String>,
        missing: Vec<String>,
    ) -> Result<(), PipelineError> {
        self.send_response(StreamEvent::Ask {
            message: message.into(),
            missing,
        })
        .await
    }

    pub async fn structured(&mut self, kind: ResultKind, value: Value) -> Result<(), PipelineError> {
        self.send_response(StreamEvent::StructuredResult { kind, value })
            .await
    }

    /// Terminal success.
    pub async fn done(&mut self) -> Result<(), PipelineError> {
        match self.state {
            RunState::Idle | RunState::Halted => {}
            RunState::Active(ordinal) => return Err(PipelineError::StepInProgress { ordinal }),
            RunState::Finished => return Err(PipelineError::Terminated),
        }
        self.send(StreamEvent::Done).await?;
        self.finish(RunOutcome::Done);
        Ok(())
    }

    /// Terminal failure. A step still running is failed first.
    pub async fn abort(&mut self, message: impl Into<String>) -> Result<(), PipelineError> {
        let message = message.into();
        match self.state {
            RunState::Finished => return Err(PipelineError::Terminated),
            RunState::Active(_) => self.fail_step(message.clone()).await?,
            RunState::Idle | RunState::Halted => {}
        }
        self.send(StreamEvent::Error(message.clone())).await?;
        self.finish(RunOutcome::Error(message));
        Ok(())
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            task: self.task,
            steps: self.steps,
            outcome: self.outcome.unwrap_or(RunOutcome::Disconnected),
        }
    }

    fn ensure_streaming(&self) -> Result<(), PipelineError> {
        match self.state {
            RunState::Idle | RunState::Active(_) => Ok(()),
            RunState::Halted => Err(PipelineError::Halted),
            RunState::Finished => Err(PipelineError::Terminated),
        }
    }

    /// A halted run may still explain itself in text, but never hands back
    /// a structured result.
    async fn send_response(&mut self, event: StreamEvent) -> Result<(), PipelineError> {
        match self.state {
            RunState::Idle => {}
            RunState::Halted if !matches!(event, StreamEvent::StructuredResult { .. }) => {}
            RunState::Halted => return Err(PipelineError::Halted),
            RunState::Active(ordinal) => return Err(PipelineError::StepInProgress { ordinal }),
            RunState::Finished => return Err(PipelineError::Terminated),
        }
        if self.responded {
            return Err(PipelineError::DuplicateResponse);
        }
        self.send(event).await
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.state = RunState::Finished;
        self.outcome = Some(outcome);
    }

    async fn send(&mut self, event: StreamEvent) -> Result<(), PipelineError> {
        if self.state == RunState::Finished && self.outcome.is_some() {
            return Err(PipelineError::Terminated);
        }
        let response = event.is_response();
        if let Err(err) = self.sink.send(event).await {
            self.state = RunState::Finished;
            self.outcome = Some(RunOutcome::Disconnected);
            return Err(err);
        }
        self.responded |= response;
        Ok(())
    }
}

/// A unit of orchestration executed as one pipeline run
#[async_trait]
pub trait PipelineTask: Send + Sync {
    /// Task name used in logs and reports
    fn name(&self) -> &'static str;

    async fn execute(&self, run: &mut PipelineRun) -> Result<(), PipelineError>;
}

/// Execute `task` as a new run that reports to `sink`.
///
/// A task that returns normally gets `Done` appended unless it already
/// ended the run. Internal errors become a terminal `Error` event. A
/// disconnected client stops the run without further events.
pub async fn run_task(task: &dyn PipelineTask, sink: EventSink) -> RunReport {
    let mut run = PipelineRun::new(task.name(), sink);
    let span = info_span!("pipeline_run", run_id = %run.run_id(), task = task.name());

    async {
        info!("run started");
        let result = match task.execute(&mut run).await {
            Ok(()) if !run.is_finished() => run.done().await,
            other => other,
        };
        match result {
            Ok(()) => info!(steps = run.steps().len(), "run finished"),
            Err(PipelineError::Disconnected) => info!("client disconnected, run stopped"),
            Err(err) => {
                error!(error = %err, "run failed with an internal fault");
                if !run.is_finished() {
                    if let Err(abort_err) = run.abort(format!("internal error: {}", err)).await {
                        debug!(error = %abort_err, "could not deliver terminal error");
                    }
                }
            }
        }
    }
    .instrument(span)
    .await;

    run.into_report()
}

/// Fail the running step on a capability failure and answer with `reply`.
async fn report_capability_failure(
    run: &mut PipelineRun,
    step_message: impl Into<String>,
    reply: impl Into<String>,
) -> Result<(), PipelineError> {
    run.fail_step(step_message).await?;
    run.respond(reply).await
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::collect_events;
    use serde_json::json;

    struct ScriptedTask<F>(F);

    #[async_trait]
    impl<F> PipelineTask for ScriptedTask<F>
    where
        F: Fn() -> Vec<Op> + Send + Sync,
    {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
            for op in (self.0)() {
                match op {
                    Op::Start(name) => {
                        run.start_step(name, "working").await?;
                    }
                    Op::Complete => run.complete_step("ok", Some(json!({"ok": true}))).await?,
                    Op::Fail(message) => run.fail_step(message).await?,
                    Op::Respond(text) => run.respond(text).await?,
                    Op::Structured => run.structured(ResultKind::HotelsData, json!([])).await?,
                    Op::Done => run.done().await?,
                }
            }
            Ok(())
        }
    }

    enum Op {
        Start(&'static str),
        Complete,
        Fail(&'static str),
        Respond(&'static str),
        Structured,
        Done,
    }

    #[tokio::test]
    async fn test_ordinals_increase_and_done_is_appended() {
        let task = ScriptedTask(|| vec![Op::Start("a"), Op::Complete, Op::Start("b"), Op::Complete]);
        let (events, report) = collect_events(&task).await;

        let ordinals: Vec<(u32, StepStatus)> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::StepUpdate(step) => Some((step.ordinal, step.status)),
                _ => None,
            })
            .collect();
        assert_eq!(
            ordinals,
            vec![
                (1, StepStatus::Running),
                (1, StepStatus::Completed),
                (2, StepStatus::Running),
                (2, StepStatus::Completed)
            ]
        );
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(report.outcome, RunOutcome::Done);
        assert_eq!(report.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_step_cannot_start_after_failure() {
        let task = ScriptedTask(|| vec![Op::Start("a"), Op::Fail("boom"), Op::Start("b")]);
        let (events, report) = collect_events(&task).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], StreamEvent::StepUpdate(step) if step.status == StepStatus::Error));
        assert_eq!(
            events[2],
            StreamEvent::Error("internal error: run halted after a failed step".to_string())
        );
        assert_eq!(
            report.outcome,
            RunOutcome::Error("internal error: run halted after a failed step".to_string())
        );
    }

    #[tokio::test]
    async fn test_halted_run_may_still_respond_and_finish() {
        let task = ScriptedTask(|| vec![Op::Start("a"), Op::Fail("x"), Op::Respond("sorry")]);
        let (events, report) = collect_events(&task).await;
        assert_eq!(events[2], StreamEvent::FinalResponse("sorry".to_string()));
        assert_eq!(events[3], StreamEvent::Done);
        assert_eq!(report.outcome, RunOutcome::Done);
    }

    #[tokio::test]
    async fn test_second_response_is_rejected() {
        let task = ScriptedTask(|| vec![Op::Structured, Op::Respond("again")]);
        let (events, _) = collect_events(&task).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Error(
                "internal error: run already produced a response".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_unfinished_step_is_failed_before_terminal_error() {
        let task = ScriptedTask(|| vec![Op::Start("a"), Op::Done]);
        let (events, _) = collect_events(&task).await;
        let message = "internal error: step 1 is still running".to_string();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            StreamEvent::StepUpdate(step) if step.status == StepStatus::Error && step.message == message
        ));
        assert_eq!(events[2], StreamEvent::Error(message));
    }

    #[tokio::test]
    async fn test_explicit_done_is_not_duplicated() {
        let task = ScriptedTask(|| vec![Op::Respond("hi"), Op::Done]);
        let (events, _) = collect_events(&task).await;
        assert_eq!(
            events,
            vec![StreamEvent::FinalResponse("hi".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_disconnect_stops_emission() {
        let (sink, rx) = EventSink::channel(4);
        drop(rx);
        let task = ScriptedTask(|| vec![Op::Start("a"), Op::Complete]);
        let report = run_task(&task, sink).await;
        assert_eq!(report.outcome, RunOutcome::Disconnected);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].status, StepStatus::Running);
    }

    #[test]
    fn test_truncate_for_log_marks_truncation() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(
            truncate_for_log("abcdef", 3),
            "abc... [truncated, total_chars=6]"
        );
    }
}
