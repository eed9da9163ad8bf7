//! Container runtimes
//!
//! The [`ContainerRuntime`] trait is everything berth needs from a container
//! engine: create volumes, start standing containers, exec into them, and find
//! them again by label.
//!
//! - `cli.rs` - `docker` / `podman` binaries driven through the Process Runner
//! - `api.rs` - Docker Engine API through bollard

mod api;
mod cli;

pub use api::DockerApiRuntime;
pub use cli::CliRuntime;

use crate::process::{EventSender, ProcessOutput};
use async_trait::async_trait;
use berth_foundation::{BerthConfig, Result, RuntimeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Command keeping a standing container alive
pub const KEEP_ALIVE_COMMAND: &str = "tail -f /dev/null";

/// Writable overlays on top of the read-only root filesystem
pub const WRITABLE_TMPFS: [&str; 2] = ["/tmp", "/run"];

/// Container engine operations used by berth
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime name for logs
    fn name(&self) -> &str;

    /// Whether the engine answers at all
    async fn is_available(&self) -> bool;

    /// Create a named volume
    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Create and start a detached container, returning its id
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Run `sh -lc <command>` inside `container`, streaming lines and heartbeats
    async fn exec_streaming(
        &self,
        container: &str,
        command: &str,
        events: EventSender,
    ) -> Result<ProcessOutput>;

    /// Ids of all containers (running or not) carrying `label_filter` (`key=value`)
    async fn list_managed(&self, label_filter: &str) -> Result<Vec<String>>;

    /// Inspect one container
    async fn inspect(&self, container: &str) -> Result<ContainerDetails>;
}

/// Build the runtime selected in `config`
pub async fn connect(config: &BerthConfig) -> Result<Arc<dyn ContainerRuntime>> {
    let heartbeat = std::time::Duration::from_secs(config.heartbeat_secs);
    let runtime: Arc<dyn ContainerRuntime> = match config.runtime {
        RuntimeKind::DockerCli | RuntimeKind::PodmanCli => {
            Arc::new(CliRuntime::new(config.runtime.program()).with_heartbeat(heartbeat))
        }
        RuntimeKind::DockerApi => Arc::new(DockerApiRuntime::connect()?.with_heartbeat(heartbeat)),
    };
    Ok(runtime)
}

/// Shell invocation used for every exec
pub fn shell_command(command: &str) -> Vec<String> {
    vec!["sh".to_string(), "-lc".to_string(), command.to_string()]
}

// ============================================================================
// Container spec
// ============================================================================

/// Mount type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
}

impl MountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountKind::Bind => "bind",
            MountKind::Volume => "volume",
        }
    }
}

/// Mount of a host path or named volume into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub kind: MountKind,
    /// Host path (bind) or volume name
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl MountSpec {
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            source: source.into().to_string_lossy().into_owned(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Volume,
            source: name.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// `--mount` argument value. The engine parses it as one CSV record.
    pub fn to_arg(&self) -> String {
        let mut arg = format!(
            "type={},{},{}",
            self.kind.as_str(),
            csv_field(&format!("src={}", self.source)),
            csv_field(&format!("dst={}", self.target))
        );
        if self.read_only {
            arg.push_str(",readonly");
        }
        arg
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Standing container to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub mounts: Vec<MountSpec>,
    pub read_only_root: bool,
    pub tmpfs: Vec<String>,
    pub working_dir: String,
    pub env: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    pub command: Vec<String>,
}

impl ContainerSpec {
    /// Read-only root, `/tmp` and `/run` overlays, kept alive by the shell
    pub fn standing(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            mounts: Vec::new(),
            read_only_root: true,
            tmpfs: WRITABLE_TMPFS.iter().map(|p| p.to_string()).collect(),
            working_dir: "/".to_string(),
            env: Vec::new(),
            labels: BTreeMap::new(),
            command: shell_command(KEEP_ALIVE_COMMAND),
        }
    }

    pub fn mount(mut self, mount: MountSpec) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Argument vector for `<runtime> run`
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];

        args.push("--name".to_string());
        args.push(self.name.clone());

        if self.read_only_root {
            args.push("--read-only".to_string());
        }
        for path in &self.tmpfs {
            args.push("--tmpfs".to_string());
            args.push(path.clone());
        }

        for mount in &self.mounts {
            args.push("--mount".to_string());
            args.push(mount.to_arg());
        }

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push("-w".to_string());
        args.push(self.working_dir.clone());

        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

// ============================================================================
// Inspection
// ============================================================================

/// Mount as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MountInfo {
    /// `bind`, `volume`, `tmpfs`, ...
    pub kind: String,
    /// Volume name for volume mounts
    pub name: Option<String>,
    pub source: Option<String>,
    pub destination: String,
}

impl MountInfo {
    pub fn is_bind(&self) -> bool {
        self.kind == MountKind::Bind.as_str()
    }

    pub fn is_volume(&self) -> bool {
        self.kind == MountKind::Volume.as_str()
    }
}

/// Container as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerDetails {
    pub id: String,
    /// Without the leading `/`
    pub name: String,
    pub image: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<MountInfo>,
}

impl ContainerDetails {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn mount_at(&self, destination: &str) -> Option<&MountInfo> {
        self.mounts.iter().find(|m| m.destination == destination)
    }
}
