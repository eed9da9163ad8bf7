//! Error types for berth
//!
//! Every crate in the workspace reports failures through this enum.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// berth error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Caller input
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("No active project")]
    NoActiveWorkspace,

    #[error("Workspace {0} is already running a command")]
    WorkspaceBusy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Processes and the container runtime
    // ========================================================================
    #[error("Failed to launch {program}: {reason}")]
    LaunchFailure { program: String, reason: String },

    #[error("Command failed{}: {stderr}", exit_code_suffix(.exit_code))]
    ExecutionFailure {
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("Provisioning failed: {0}")]
    ProvisionFailure(String),

    #[error("Reconciliation skipped: {0}")]
    ReconciliationSkipped(String),

    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_code_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {})", code),
        None => String::new(),
    }
}

impl Error {
    /// Build a launch failure for `program`
    pub fn launch(program: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::LaunchFailure {
            program: program.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an execution failure from captured stderr and an exit code
    pub fn execution(stderr: impl Into<String>, exit_code: Option<i32>) -> Self {
        Error::ExecutionFailure {
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Whether retrying later could succeed without caller changes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LaunchFailure { .. } | Error::ReconciliationSkipped(_)
        )
    }

    /// Whether the failure is the caller's fault
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::PathNotFound(_)
                | Error::NoActiveWorkspace
                | Error::WorkspaceBusy(_)
                | Error::NotFound(_)
        )
    }

    /// Concise reason string shown to callers and written to workspace logs.
    ///
    /// Execution failures surface the command's stderr rather than the
    /// wrapper text, falling back to the exit code when stderr is empty.
    pub fn user_message(&self) -> String {
        match self {
            Error::ExecutionFailure { stderr, exit_code } => {
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    stderr.to_string()
                } else {
                    match exit_code {
                        Some(code) => format!("command exited with code {}", code),
                        None => "command was terminated by a signal".to_string(),
                    }
                }
            }
            Error::LaunchFailure { program, reason } => {
                format!("could not start {}: {}", program, reason)
            }
            Error::ProvisionFailure(reason) | Error::ReconciliationSkipped(reason) => {
                reason.clone()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failure_message_prefers_stderr() {
        let err = Error::execution("boom\n", Some(2));
        assert_eq!(err.user_message(), "boom");

        let err = Error::execution("", Some(7));
        assert_eq!(err.user_message(), "command exited with code 7");
    }

    #[test]
    fn test_display_includes_exit_code() {
        let err = Error::execution("bad", Some(3));
        assert_eq!(err.to_string(), "Command failed (exit code 3): bad");
    }

    #[test]
    fn test_classification() {
        assert!(Error::launch("docker", "not found").is_retryable());
        assert!(Error::NoActiveWorkspace.is_user_facing());
        assert!(!Error::ProvisionFailure("x".into()).is_user_facing());
    }
}
