//! Process Runner - runs external commands with line streaming
//!
//! Features:
//! - Full stdout/stderr capture
//! - Line-delimited streaming (`\n`, `\r\n` and bare `\r` boundaries)
//! - Periodic heartbeat events while the process runs
//! - Launch failures and non-zero exits reported as distinct errors

use berth_foundation::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Read chunk size for process pipes
const READ_CHUNK: usize = 8192;

/// Captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Incremental event emitted while a process runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One complete stdout line (without terminator)
    Stdout(String),
    /// One complete stderr line (without terminator)
    Stderr(String),
    /// Liveness tick carrying elapsed whole seconds
    Heartbeat(u64),
}

/// Sender half for [`StreamEvent`]s
pub type EventSender = mpsc::UnboundedSender<StreamEvent>;

// ============================================================================
// Line buffering
// ============================================================================

/// Splits arbitrary byte chunks into complete lines.
///
/// A `\r` at the end of one chunk followed by `\n` at the start of the next is
/// a single `\r\n` boundary.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    pending_cr: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }

            match byte {
                b'\n' => lines.push(self.take_line()),
                b'\r' => {
                    lines.push(self.take_line());
                    self.pending_cr = true;
                }
                _ => self.pending.push(byte),
            }
        }

        lines
    }

    /// Flush the unterminated tail, if any
    pub fn finish(&mut self) -> Option<String> {
        self.pending_cr = false;
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

// ============================================================================
// Stream pump
// ============================================================================

/// Accumulates output of both streams and forwards complete lines as events.
///
/// Blank lines are kept in the captured output but not forwarded.
#[derive(Debug)]
pub struct StreamPump {
    stdout_lines: LineBuffer,
    stderr_lines: LineBuffer,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    events: Option<EventSender>,
}

impl StreamPump {
    pub fn new(events: Option<EventSender>) -> Self {
        Self {
            stdout_lines: LineBuffer::new(),
            stderr_lines: LineBuffer::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            events,
        }
    }

    pub fn stdout(&mut self, chunk: &[u8]) {
        self.stdout.extend_from_slice(chunk);
        for line in self.stdout_lines.push(chunk) {
            self.emit(StreamEvent::Stdout(line));
        }
    }

    pub fn stderr(&mut self, chunk: &[u8]) {
        self.stderr.extend_from_slice(chunk);
        for line in self.stderr_lines.push(chunk) {
            self.emit(StreamEvent::Stderr(line));
        }
    }

    pub fn heartbeat(&mut self, elapsed_secs: u64) {
        self.emit(StreamEvent::Heartbeat(elapsed_secs));
    }

    /// Flush trailing fragments and return the captured output
    pub fn finish(mut self) -> ProcessOutput {
        if let Some(line) = self.stdout_lines.finish() {
            self.emit(StreamEvent::Stdout(line));
        }
        if let Some(line) = self.stderr_lines.finish() {
            self.emit(StreamEvent::Stderr(line));
        }

        ProcessOutput {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }

    fn emit(&mut self, event: StreamEvent) {
        let blank = matches!(&event, StreamEvent::Stdout(l) | StreamEvent::Stderr(l) if l.trim().is_empty());
        if blank {
            return;
        }
        if let Some(tx) = &self.events {
            // Receiver may be gone; output is still captured
            if tx.send(event).is_err() {
                self.events = None;
            }
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Runs host processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    heartbeat: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat.max(Duration::from_millis(1));
        self
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Run to completion and collect output
    pub async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput> {
        self.run_inner(program, args, None).await
    }

    /// Run to completion, forwarding lines and heartbeats to `events`
    pub async fn run_streaming(
        &self,
        program: &str,
        args: &[String],
        events: EventSender,
    ) -> Result<ProcessOutput> {
        self.run_inner(program, args, Some(events)).await
    }

    async fn run_inner(
        &self,
        program: &str,
        args: &[String],
        events: Option<EventSender>,
    ) -> Result<ProcessOutput> {
        debug!("Running {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::launch(program, e))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::launch(program, "stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::launch(program, "stderr was not captured"))?;

        let mut pump = StreamPump::new(events);
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.heartbeat, self.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];
        let mut stdout_open = true;
        let mut stderr_open = true;

        let status = loop {
            tokio::select! {
                read = stdout.read(&mut out_buf), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => pump.stdout(&out_buf[..n]),
                    Err(e) => {
                        warn!("Failed to read stdout of {}: {}", program, e);
                        stdout_open = false;
                    }
                },
                read = stderr.read(&mut err_buf), if stderr_open => match read {
                    Ok(0) => stderr_open = false,
                    Ok(n) => pump.stderr(&err_buf[..n]),
                    Err(e) => {
                        warn!("Failed to read stderr of {}: {}", program, e);
                        stderr_open = false;
                    }
                },
                _ = ticker.tick() => pump.heartbeat(started.elapsed().as_secs()),
                status = child.wait(), if !stdout_open && !stderr_open => break status?,
            }
        };

        let output = pump.finish();
        if status.success() {
            Ok(output)
        } else {
            debug!("{} exited with {:?}", program, status.code());
            Err(Error::execution(output.stderr, status.code()))
        }
    }
}
