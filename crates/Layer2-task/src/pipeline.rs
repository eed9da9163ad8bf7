//! Command Execution Pipeline
//!
//! Runs one shell command inside a workspace container and records the run:
//! `idle -> running -> completed | error`.
//!
//! - stdout lines become `stdout` log entries
//! - stderr lines become `warning` entries (advisory, never fatal)
//! - heartbeats move the progress estimate forward
//! - a non-zero exit fails the run

use crate::log::LogEntry;
use crate::process::{ProcessOutput, StreamEvent};
use crate::registry::WorkspaceRegistry;
use crate::runtime::ContainerRuntime;
use crate::state::{format_elapsed, ExecutionStatus};
use crate::workspace::{Workspace, WorkspaceId};
use berth_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builds a JAR with whichever build tool the project uses
const BUILD_JAR_COMMAND: &str = "if [ -x ./gradlew ]; then ./gradlew --no-daemon jar; \
elif [ -f pom.xml ]; then mvn -q -DskipTests package; \
elif [ -f build.gradle ] || [ -f build.gradle.kts ]; then gradle --no-daemon jar; \
else echo \"No Gradle or Maven build found\" >&2; exit 1; fi";

// ============================================================================
// Shortcuts
// ============================================================================

/// Named actions translated to canonical shell pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Shortcut {
    /// Run the project's tests
    Test,
    /// Commit every change
    Save,
    /// Summarize changes for review
    CreatePr,
    /// Produce a JAR artifact
    BuildJar,
}

impl Shortcut {
    pub const ALL: [Shortcut; 4] = [
        Shortcut::Test,
        Shortcut::Save,
        Shortcut::CreatePr,
        Shortcut::BuildJar,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Shortcut::Test => "test",
            Shortcut::Save => "save",
            Shortcut::CreatePr => "create-pr",
            Shortcut::BuildJar => "build-jar",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key() == key.trim())
    }

    pub fn command(&self) -> &'static str {
        match self {
            Shortcut::Test => "npm test || bun test || echo \"No tests found\"",
            Shortcut::Save => "git add -A && git commit -m \"chore: save from panel\" || true",
            Shortcut::CreatePr => "git status --short",
            Shortcut::BuildJar => BUILD_JAR_COMMAND,
        }
    }
}

/// Shortcut pipeline for `input`, or `input` itself
pub fn resolve_command(input: &str) -> String {
    match Shortcut::parse(input) {
        Some(shortcut) => shortcut.command().to_string(),
        None => input.trim().to_string(),
    }
}

/// Render a prompt through the optional template.
///
/// `{prompt}` is replaced with the shell-quoted prompt; without a template the
/// prompt runs verbatim.
pub fn render_prompt(template: Option<&str>, prompt: &str) -> Result<String> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(Error::InvalidInput("prompt is required".to_string()));
    }

    match template.filter(|t| !t.trim().is_empty()) {
        Some(template) => {
            let quoted = shlex::try_quote(prompt)
                .map_err(|e| Error::InvalidInput(format!("prompt cannot be quoted: {}", e)))?;
            Ok(template.replace("{prompt}", &quoted))
        }
        None => Ok(prompt.to_string()),
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Executes commands in workspaces, one at a time per workspace
pub struct ExecutionPipeline {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<WorkspaceRegistry>,
}

impl ExecutionPipeline {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<WorkspaceRegistry>) -> Self {
        Self { runtime, registry }
    }

    /// Run `command` and wait for it to finish
    pub async fn execute(&self, workspace: &Workspace, command: &str) -> Result<ProcessOutput> {
        let command = self.begin(workspace, command)?;
        self.run(workspace, &command).await
    }

    /// Start `command` in the background.
    ///
    /// The run lock and the running status are in place when this returns.
    pub fn dispatch(
        self: &Arc<Self>,
        workspace: Workspace,
        command: &str,
    ) -> Result<JoinHandle<Result<ProcessOutput>>> {
        let command = self.begin(&workspace, command)?;
        let pipeline = Arc::clone(self);
        Ok(tokio::spawn(async move {
            pipeline.run(&workspace, &command).await
        }))
    }

    fn begin(&self, workspace: &Workspace, command: &str) -> Result<String> {
        let command = command.trim();
        if command.is_empty() {
            return Err(Error::InvalidInput("command is required".to_string()));
        }

        self.registry.try_begin_run(&workspace.id, command)?;
        self.registry.append_log(
            &workspace.id,
            LogEntry::info(format!("Running command in {}", workspace.container_name)),
        );
        self.registry
            .append_log(&workspace.id, LogEntry::info(format!("> {}", command)));

        Ok(command.to_string())
    }

    async fn run(&self, workspace: &Workspace, command: &str) -> Result<ProcessOutput> {
        let id = &workspace.id;
        let started = Instant::now();
        debug!(workspace = %id, container = %workspace.container_name, "Executing: {}", command);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let exec = self
            .runtime
            .exec_streaming(&workspace.container_name, command, tx);
        tokio::pin!(exec);

        let result = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => self.on_event(id, event),
                result = &mut exec => break result,
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.on_event(id, event);
        }

        let elapsed = started.elapsed().as_secs();
        match result {
            Ok(output) => {
                self.registry
                    .set_status(id, ExecutionStatus::completed(elapsed));
                self.registry.append_log(
                    id,
                    LogEntry::info(format!("Command finished in {}", format_elapsed(elapsed))),
                );
                info!(workspace = %id, "Command finished in {}s", elapsed);
                Ok(output)
            }
            Err(err) => {
                let reason = failure_reason(&err);
                self.registry
                    .set_status(id, ExecutionStatus::failed(elapsed, &reason));
                self.registry
                    .append_log(id, LogEntry::error(format!("Command failed: {}", reason)));
                warn!(workspace = %id, "Command failed after {}s: {}", elapsed, reason);
                Err(err)
            }
        }
    }

    fn on_event(&self, id: &WorkspaceId, event: StreamEvent) {
        match event {
            StreamEvent::Stdout(line) => self.registry.append_log(id, LogEntry::stdout(line)),
            StreamEvent::Stderr(line) => self.registry.append_log(id, LogEntry::warning(line)),
            StreamEvent::Heartbeat(elapsed) => self
                .registry
                .update_running_status(id, |status| status.running(elapsed)),
        }
    }
}

/// Reason recorded for a failed run
fn failure_reason(err: &Error) -> String {
    match err {
        Error::ExecutionFailure {
            stderr,
            exit_code: Some(code),
        } => match stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
            Some(line) => format!("exit code {}: {}", code, line),
            None => format!("exit code {}", code),
        },
        other => other.user_message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortcuts() {
        assert_eq!(
            resolve_command("test"),
            "npm test || bun test || echo \"No tests found\""
        );
        assert_eq!(resolve_command("create-pr"), "git status --short");
        assert!(resolve_command("build-jar").contains("gradlew"));
        assert_eq!(resolve_command("  ls -la  "), "ls -la");
        assert_eq!(Shortcut::parse("save"), Some(Shortcut::Save));
        assert_eq!(Shortcut::parse("deploy"), None);
    }

    #[test]
    fn test_render_prompt() {
        assert_eq!(render_prompt(None, " echo hi ").unwrap(), "echo hi");
        let rendered = render_prompt(Some("codex exec {prompt}"), "fix the bug; rm -rf /").unwrap();
        assert_eq!(
            shlex::split(&rendered).unwrap(),
            vec!["codex", "exec", "fix the bug; rm -rf /"]
        );
        assert!(matches!(
            render_prompt(None, "   "),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(failure_reason(&Error::execution("", Some(7))), "exit code 7");
        assert_eq!(
            failure_reason(&Error::execution("warn\nfatal: boom\n", Some(128))),
            "exit code 128: fatal: boom"
        );
        assert_eq!(
            failure_reason(&Error::launch("docker", "not found")),
            "could not start docker: not found"
        );
    }
}
