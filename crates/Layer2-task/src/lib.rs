//! # berth-task
//!
//! Containerized workspaces for berth.
//! Binds host code directories into standing containers and runs shell
//! commands inside them with streamed output.
//!
//! ## Features
//!
//! - Workspace provisioning (code bind mount + isolated state/home store)
//! - Process Runner with line streaming and heartbeats
//! - Docker / Podman CLI and Docker Engine API runtimes
//! - Per-workspace status and bounded logs
//! - **Reconciliation from container labels after a restart**
//! - Archive upload and build artifact lookup

pub mod artifact;
pub mod log;
pub mod pipeline;
pub mod process;
pub mod provisioner;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod state;
pub mod upload;
pub mod workspace;

// Process system
pub use process::{
    EventSender, LineBuffer, ProcessOutput, ProcessRunner, StreamEvent, StreamPump,
    DEFAULT_HEARTBEAT,
};

// Workspace system
pub use provisioner::{ProvisionRequest, Provisioner, READY_STEP};
pub use registry::{workspace_from_container, ReconcileReport, WorkspaceRegistry, RECOVERED_STEP};
pub use state::{ExecutionStatus, RunState};
pub use workspace::{StateStore, Workspace, WorkspaceId};

// Execution
pub use pipeline::{render_prompt, resolve_command, ExecutionPipeline, Shortcut};

// Log system
pub use log::{LogEntry, LogKind, WorkspaceLogBuffer};

// Container runtimes
pub use runtime::{
    ContainerDetails, ContainerRuntime, ContainerSpec, CliRuntime, DockerApiRuntime, MountInfo,
    MountKind, MountSpec,
};

// Files
pub use artifact::{find_latest_artifact, ArtifactFilter};
pub use upload::{decode_upload, extract_zip, UploadResult};

// Service
pub use service::{Dispatched, Health, Target, WorkspaceService};
