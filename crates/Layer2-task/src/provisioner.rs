//! Workspace Provisioner - binds a host directory to a new standing container

use crate::log::LogEntry;
use crate::registry::WorkspaceRegistry;
use crate::runtime::{ContainerRuntime, ContainerSpec, MountSpec};
use crate::state::ExecutionStatus;
use crate::workspace::{label, name_suffix, slugify, StateStore, Workspace, WorkspaceId};
use berth_foundation::{BerthConfig, Error, Result};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Status step of a freshly provisioned workspace
pub const READY_STEP: &str = "container ready (code isolated)";

/// Provision parameters; unset values fall back to the config defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    /// Host directory with the code
    #[serde(rename = "path", default)]
    pub host_path: PathBuf,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub code_mount_path: Option<String>,
    #[serde(default)]
    pub home_path: Option<String>,
    /// Host directory bind-mounted as home instead of a managed volume
    #[serde(default)]
    pub system_host_path: Option<PathBuf>,
}

impl ProvisionRequest {
    pub fn new(host_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn system_host_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.system_host_path = Some(path.into());
        self
    }
}

/// Creates workspaces
pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<WorkspaceRegistry>,
    config: Arc<BerthConfig>,
}

impl Provisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<WorkspaceRegistry>,
        config: Arc<BerthConfig>,
    ) -> Self {
        Self {
            runtime,
            registry,
            config,
        }
    }

    /// Start a standing container for `request.host_path` and register it.
    ///
    /// Nothing is registered unless the container started.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<Workspace> {
        if request.host_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("path is required".to_string()));
        }

        let host_path = resolve_existing(&request.host_path).await?;
        let system_path = match non_empty_path(request.system_host_path) {
            Some(path) => Some(resolve_existing(&path).await?),
            None => None,
        };

        let name = non_empty(request.name)
            .or_else(|| {
                host_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "workspace".to_string());
        let image = non_empty(request.image).unwrap_or_else(|| self.config.default_image.clone());
        let code_mount_path = container_path(request.code_mount_path, &self.config.code_mount_path)?;
        let home_path = container_path(request.home_path, &self.config.home_path)?;
        if code_mount_path == home_path {
            return Err(Error::InvalidInput(
                "code mount path and home path must differ".to_string(),
            ));
        }

        let created_at = Utc::now();
        let prefix = slugify(&self.config.label_prefix);
        let slug = slugify(&name);
        let suffix = name_suffix(created_at);
        let container_name = format!("{}-{}-{}", prefix, slug, suffix);

        let state_store = match system_path {
            Some(path) => StateStore::HostBind { path },
            None => StateStore::ManagedVolume {
                name: format!("{}-state-{}-{}", prefix, slug, suffix),
            },
        };

        let workspace = Workspace {
            id: WorkspaceId::generate(),
            name,
            host_path,
            container_name,
            code_mount_path,
            home_path,
            state_store,
            image: Some(image.clone()),
            created_at,
        };

        let state_mount = match &workspace.state_store {
            StateStore::ManagedVolume { name } => {
                let mut volume_labels = BTreeMap::new();
                volume_labels.insert(
                    self.config.label(label::ID),
                    workspace.id.to_string(),
                );
                self.runtime
                    .create_volume(name, &volume_labels)
                    .await
                    .map_err(|e| provision_failure("creating state volume", e))?;
                MountSpec::volume(name.clone(), workspace.home_path.clone())
            }
            StateStore::HostBind { path } => {
                MountSpec::bind(path.clone(), workspace.home_path.clone())
            }
        };

        let spec = ContainerSpec::standing(workspace.container_name.clone(), image.clone())
            .mount(MountSpec::bind(
                workspace.host_path.clone(),
                workspace.code_mount_path.clone(),
            ))
            .mount(state_mount)
            .env("HOME", workspace.home_path.clone())
            .working_dir(workspace.code_mount_path.clone())
            .labels(workspace.labels(&self.config.label_prefix));

        let container_id = self
            .runtime
            .run_container(&spec)
            .await
            .map_err(|e| provision_failure("starting container", e))?;

        let entries = vec![
            LogEntry::info(format!(
                "Container {} started ({})",
                workspace.container_name, image
            )),
            LogEntry::info(format!(
                "Code: {} -> {} | state/home: {} -> {}",
                workspace.host_path.display(),
                workspace.code_mount_path,
                workspace.state_store.describe(),
                workspace.home_path
            )),
        ];

        self.registry
            .register(workspace.clone(), ExecutionStatus::idle(READY_STEP), entries);

        info!(
            workspace = %workspace.id,
            container = %workspace.container_name,
            "Provisioned workspace ({})",
            short_id(&container_id)
        );
        Ok(workspace)
    }
}

fn provision_failure(step: &str, err: Error) -> Error {
    warn!("Provisioning failed while {}: {}", step, err);
    Error::ProvisionFailure(format!("{}: {}", step, err.user_message()))
}

/// Absolute form of an existing host path
async fn resolve_existing(path: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|_| Error::PathNotFound(path.to_path_buf()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn non_empty_path(value: Option<PathBuf>) -> Option<PathBuf> {
    value.filter(|p| !p.as_os_str().is_empty())
}

/// In-container absolute path, or the default
fn container_path(value: Option<String>, default: &str) -> Result<String> {
    let path = non_empty(value).unwrap_or_else(|| default.to_string());
    if !path.starts_with('/') {
        return Err(Error::InvalidInput(format!(
            "container path must be absolute: {}",
            path
        )));
    }
    Ok(path)
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_path_defaults_and_validation() {
        assert_eq!(
            container_path(None, "/workspace/project").unwrap(),
            "/workspace/project"
        );
        assert_eq!(
            container_path(Some("  ".into()), "/codex-home").unwrap(),
            "/codex-home"
        );
        assert!(matches!(
            container_path(Some("relative/dir".into()), "/x"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_request_deserializes_panel_fields() {
        let request: ProvisionRequest = serde_json::from_str(
            r#"{"path": "/src/app", "name": "App", "systemHostPath": "/srv/home"}"#,
        )
        .unwrap();
        assert_eq!(request.host_path, PathBuf::from("/src/app"));
        assert_eq!(request.name.as_deref(), Some("App"));
        assert_eq!(request.system_host_path, Some(PathBuf::from("/srv/home")));
        assert!(request.image.is_none());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
