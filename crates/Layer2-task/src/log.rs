//! Workspace Log System - bounded, append-only log per workspace
//!
//! Provides:
//! - Structured entries (stdout, warning, info, error)
//! - FIFO eviction beyond a fixed capacity
//! - Real-time subscription for followers

use berth_foundation::DEFAULT_LOG_CAPACITY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Broadcast channel capacity
const BROADCAST_CAPACITY: usize = 256;

/// Kind of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Command stdout
    Stdout,
    /// Command stderr (advisory)
    Warning,
    /// Lifecycle messages
    Info,
    /// Failures
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Stdout => "stdout",
            LogKind::Warning => "warning",
            LogKind::Info => "info",
            LogKind::Error => "error",
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Serialized as `type` for the panel
    #[serde(rename = "type")]
    pub kind: LogKind,
    /// Always a single line
    pub message: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl AsRef<str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            message: single_line(message.as_ref()),
        }
    }

    pub fn stdout(message: impl AsRef<str>) -> Self {
        Self::new(LogKind::Stdout, message)
    }

    pub fn warning(message: impl AsRef<str>) -> Self {
        Self::new(LogKind::Warning, message)
    }

    pub fn info(message: impl AsRef<str>) -> Self {
        Self::new(LogKind::Info, message)
    }

    pub fn error(message: impl AsRef<str>) -> Self {
        Self::new(LogKind::Error, message)
    }

    /// One-line rendering for terminals
    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.kind.as_str(),
            self.message
        )
    }
}

/// Collapse embedded line breaks into spaces
fn single_line(message: &str) -> String {
    if !message.contains(['\n', '\r']) {
        return message.to_string();
    }
    message
        .split(['\n', '\r'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log buffer for a single workspace
#[derive(Debug)]
pub struct WorkspaceLogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    tx: broadcast::Sender<LogEntry>,
}

impl Default for WorkspaceLogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for WorkspaceLogBuffer {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            capacity: self.capacity,
            tx: self.tx.clone(),
        }
    }
}

impl WorkspaceLogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            tx,
        }
    }

    /// Append an entry, evicting the oldest beyond capacity
    pub fn push(&mut self, entry: LogEntry) {
        let _ = self.tx.send(entry.clone());

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn push_info(&mut self, message: impl AsRef<str>) {
        self.push(LogEntry::info(message));
    }

    pub fn push_error(&mut self, message: impl AsRef<str>) {
        self.push(LogEntry::error(message));
    }

    /// Subscribe to entries appended from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Snapshot in insertion order
    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
