//! Workspace Service - the one entry point used by the API and the CLI
//!
//! Owns the runtime, the registry, the provisioner and the pipeline, and
//! resolves the target workspace (`id`, then host path, then the first one)
//! for every per-workspace operation.

use crate::artifact::{find_latest_artifact, ArtifactFilter};
use crate::log::LogEntry;
use crate::pipeline::{render_prompt, resolve_command, ExecutionPipeline};
use crate::process::ProcessOutput;
use crate::provisioner::{ProvisionRequest, Provisioner};
use crate::registry::{ReconcileReport, WorkspaceRegistry};
use crate::runtime::{self, ContainerRuntime};
use crate::state::ExecutionStatus;
use crate::upload::{decode_upload, extract_zip, UploadResult};
use crate::workspace::Workspace;
use berth_foundation::{BerthConfig, Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Which workspace an operation targets
#[derive(Debug, Clone, Copy, Default)]
pub struct Target<'a> {
    pub id: Option<&'a str>,
    pub path: Option<&'a Path>,
}

impl<'a> Target<'a> {
    /// First registered workspace
    pub fn any() -> Self {
        Self::default()
    }

    pub fn id(id: &'a str) -> Self {
        Self {
            id: Some(id),
            path: None,
        }
    }

    pub fn path(path: &'a Path) -> Self {
        Self {
            id: None,
            path: Some(path),
        }
    }

    pub fn from_options(id: Option<&'a str>, path: Option<&'a Path>) -> Self {
        Self { id, path }
    }
}

/// Service health snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub workspaces: usize,
    pub runtime: String,
    pub runtime_available: bool,
}

/// A run started in the background
pub struct Dispatched {
    pub workspace: Workspace,
    pub command: String,
    pub handle: JoinHandle<Result<ProcessOutput>>,
}

pub struct WorkspaceService {
    config: Arc<BerthConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<WorkspaceRegistry>,
    provisioner: Provisioner,
    pipeline: Arc<ExecutionPipeline>,
}

impl WorkspaceService {
    /// Connect to the runtime selected in `config`
    pub async fn connect(config: BerthConfig) -> Result<Self> {
        let runtime = runtime::connect(&config).await?;
        Ok(Self::new(config, runtime))
    }

    pub fn new(config: BerthConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(WorkspaceRegistry::new(config.log_capacity));
        let provisioner = Provisioner::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
            Arc::clone(&config),
        );
        let pipeline = Arc::new(ExecutionPipeline::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
        ));

        Self {
            config,
            runtime,
            registry,
            provisioner,
            pipeline,
        }
    }

    pub fn config(&self) -> &BerthConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkspaceRegistry> {
        &self.registry
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    pub async fn provision(&self, request: ProvisionRequest) -> Result<Workspace> {
        self.provisioner.provision(request).await
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.registry
            .reconcile_from_runtime(self.runtime.as_ref(), &self.config)
            .await
    }

    /// Reconcile, then list. A skipped reconciliation still lists what is known.
    pub async fn list(&self) -> Vec<Workspace> {
        if let Err(e) = self.reconcile().await {
            warn!("Listing without reconciliation: {}", e);
        }
        self.registry.list()
    }

    pub fn resolve(&self, target: Target<'_>) -> Result<Workspace> {
        self.registry.require(target.id, target.path)
    }

    pub fn status(&self, target: Target<'_>) -> Result<ExecutionStatus> {
        let workspace = self.resolve(target)?;
        Ok(self.registry.status(&workspace.id).unwrap_or_default())
    }

    pub fn logs(&self, target: Target<'_>) -> Result<Vec<LogEntry>> {
        let workspace = self.resolve(target)?;
        Ok(self.registry.logs(&workspace.id))
    }

    /// Current log snapshot plus a receiver for later entries
    pub fn follow_logs(
        &self,
        target: Target<'_>,
    ) -> Result<(Vec<LogEntry>, broadcast::Receiver<LogEntry>)> {
        let workspace = self.resolve(target)?;
        let receiver = self
            .registry
            .subscribe_logs(&workspace.id)
            .ok_or(Error::NoActiveWorkspace)?;
        Ok((self.registry.logs(&workspace.id), receiver))
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run a raw command and wait for it
    pub async fn execute(&self, target: Target<'_>, command: &str) -> Result<ProcessOutput> {
        let workspace = self.resolve(target)?;
        self.pipeline.execute(&workspace, command).await
    }

    /// Run a shortcut key or raw command and wait for it
    pub async fn run_command(&self, target: Target<'_>, input: &str) -> Result<ProcessOutput> {
        self.execute(target, &resolve_command(input)).await
    }

    /// Start a shortcut key or raw command in the background
    pub fn dispatch_command(&self, target: Target<'_>, input: &str) -> Result<Dispatched> {
        let workspace = self.resolve(target)?;
        let command = resolve_command(input);
        self.dispatch(workspace, command)
    }

    /// Render and run a prompt, waiting for it
    pub async fn prompt(&self, target: Target<'_>, text: &str) -> Result<ProcessOutput> {
        let command = render_prompt(self.config.prompt_template.as_deref(), text)?;
        self.execute(target, &command).await
    }

    /// Render and start a prompt in the background
    pub fn dispatch_prompt(&self, target: Target<'_>, text: &str) -> Result<Dispatched> {
        let command = render_prompt(self.config.prompt_template.as_deref(), text)?;
        let workspace = self.resolve(target)?;
        self.dispatch(workspace, command)
    }

    fn dispatch(&self, workspace: Workspace, command: String) -> Result<Dispatched> {
        let handle = self.pipeline.dispatch(workspace.clone(), &command)?;
        info!(workspace = %workspace.id, "Dispatched: {}", command);
        Ok(Dispatched {
            workspace,
            command,
            handle,
        })
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Extract a base64 zip into the workspace host directory
    pub async fn upload_archive(
        &self,
        target: Target<'_>,
        file_name: &str,
        payload_base64: &str,
    ) -> Result<UploadResult> {
        let workspace = self.resolve(target)?;
        let id = workspace.id.clone();

        let result = match decode_upload(file_name, payload_base64) {
            Ok(bytes) => {
                let file_name = file_name.trim().to_string();
                let host_path = workspace.host_path.clone();
                tokio::task::spawn_blocking(move || extract_zip(&file_name, &bytes, &host_path))
                    .await
                    .unwrap_or_else(|e| Err(Error::Internal(format!("upload task failed: {}", e))))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(result) => {
                self.registry.append_log(
                    &id,
                    LogEntry::info(format!(
                        "Uploaded {}: {} files extracted into {}",
                        file_name.trim(),
                        result.extracted_files,
                        result.target_path.display()
                    )),
                );
                info!(workspace = %id, files = result.extracted_files, "Archive extracted");
                Ok(result)
            }
            Err(e) => {
                self.registry.append_log(
                    &id,
                    LogEntry::error(format!("Upload failed: {}", e.user_message())),
                );
                warn!(workspace = %id, "Upload failed: {}", e);
                Err(e)
            }
        }
    }

    /// Most recent build artifact in the workspace host directory
    pub async fn latest_artifact(&self, target: Target<'_>) -> Result<PathBuf> {
        let workspace = self.resolve(target)?;
        let filter = ArtifactFilter::from_config(&self.config);
        let root = workspace.host_path.clone();

        let found = tokio::task::spawn_blocking(move || find_latest_artifact(&root, &filter))
            .await
            .map_err(|e| Error::Internal(format!("artifact lookup failed: {}", e)))?;

        found.ok_or_else(|| {
            Error::NotFound(format!(
                "no build artifact in {}",
                workspace.host_path.display()
            ))
        })
    }

    pub async fn health(&self) -> Health {
        Health {
            workspaces: self.registry.len(),
            runtime: self.runtime.name().to_string(),
            runtime_available: self.runtime.is_available().await,
        }
    }
}
