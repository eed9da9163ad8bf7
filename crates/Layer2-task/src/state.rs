//! Workspace run state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Initial progress of a started run
pub const START_PROGRESS: u8 = 20;

/// Progress ceiling while a run is still going
pub const MAX_RUNNING_PROGRESS: u8 = 95;

/// Phase of a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No command has run yet, or the workspace was just provisioned
    #[default]
    Idle,

    /// A command is running
    Running,

    /// Advisory phase for the panel, never produced by the pipeline
    Merging,

    /// Advisory phase for the panel, never produced by the pipeline
    Testing,

    /// Last command exited successfully
    Completed,

    /// Last command failed
    Error,
}

impl RunState {
    /// Check if a command is in flight
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }

    /// Check if this is a terminal state of a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Merging => "merging",
            RunState::Testing => "testing",
            RunState::Completed => "completed",
            RunState::Error => "error",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of one workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub status: RunState,
    /// 0-100
    pub progress: u8,
    pub current_step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::idle("Ready")
    }
}

impl ExecutionStatus {
    pub fn idle(step: impl Into<String>) -> Self {
        Self {
            status: RunState::Idle,
            progress: 0,
            current_step: step.into(),
            started_at: None,
        }
    }

    /// Status of a freshly started run
    pub fn starting(command: &str) -> Self {
        Self {
            status: RunState::Running,
            progress: START_PROGRESS,
            current_step: format!("starting: {}", command),
            started_at: Some(Utc::now()),
        }
    }

    /// Status after `elapsed_secs` of a run
    pub fn running(&self, elapsed_secs: u64) -> Self {
        Self {
            status: RunState::Running,
            progress: estimate_progress(elapsed_secs).max(self.progress),
            current_step: format!("running for {}", format_elapsed(elapsed_secs)),
            started_at: self.started_at,
        }
    }

    pub fn completed(elapsed_secs: u64) -> Self {
        Self {
            status: RunState::Completed,
            progress: 100,
            current_step: format!("completed in {}", format_elapsed(elapsed_secs)),
            started_at: None,
        }
    }

    pub fn failed(elapsed_secs: u64, reason: &str) -> Self {
        Self {
            status: RunState::Error,
            progress: 100,
            current_step: format!("failed after {}: {}", format_elapsed(elapsed_secs), reason),
            started_at: None,
        }
    }
}

/// `min(95, 20 + elapsed / 6)`
pub fn estimate_progress(elapsed_secs: u64) -> u8 {
    let estimate = u64::from(START_PROGRESS) + elapsed_secs / 6;
    estimate.min(u64::from(MAX_RUNNING_PROGRESS)) as u8
}

/// `42s` or `3m 05s`
pub fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
