//! Step type definitions
//!
//! A step is recorded once per unit of work in a pipeline run and moves
//! through `pending -> running -> completed | error` exactly once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Recorded, work not started
    Pending,
    /// Work in progress
    Running,
    /// Finished successfully
    Completed,
    /// Finished with a failure
    Error,
}

impl StepStatus {
    /// Transition table for the step lifecycle.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Error)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one step in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position in the run, strictly increasing
    #[serde(rename = "step")]
    pub ordinal: u32,
    /// Stable step name, e.g. `invoke-search`
    pub name: String,
    pub status: StepStatus,
    /// Human-readable progress message
    pub message: String,
    /// Optional structured payload produced by the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StepRecord {
    pub fn pending(ordinal: u32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ordinal,
            name: name.into(),
            status: StepStatus::Pending,
            message: message.into(),
            data: None,
        }
    }

    /// Move to `next`, rejecting anything the transition table does not allow.
    pub(crate) fn transition(&mut self, next: StepStatus) -> Result<(), (StepStatus, StepStatus)> {
        if !self.status.can_transition_to(next) {
            return Err((self.status, next));
        }
        self.status = next;
        Ok(())
    }
}
