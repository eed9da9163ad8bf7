//! Workspace Registry - in-memory workspaces, statuses and logs
//!
//! All three maps live behind one lock so status and log writes for a
//! workspace are serialized. The lock is never held across an `.await`.
//!
//! Reconciliation rebuilds the workspace set from the containers the runtime
//! reports, using their labels and mounts.

use crate::log::{LogEntry, WorkspaceLogBuffer};
use crate::runtime::{ContainerDetails, ContainerRuntime};
use crate::state::ExecutionStatus;
use crate::workspace::{label, StateStore, Workspace, WorkspaceId};
use berth_foundation::{BerthConfig, Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Step shown for workspaces found during reconciliation
pub const RECOVERED_STEP: &str = "recovered after restart";

#[derive(Debug, Default)]
struct RegistryState {
    workspaces: BTreeMap<WorkspaceId, Workspace>,
    statuses: BTreeMap<WorkspaceId, ExecutionStatus>,
    logs: BTreeMap<WorkspaceId, WorkspaceLogBuffer>,
    /// Bumped by every `register` call
    generation: u64,
    registered_at: BTreeMap<WorkspaceId, u64>,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Workspaces registered afterwards
    pub workspaces: usize,
    /// Workspaces seen for the first time
    pub recovered: usize,
    /// Managed containers that could not be mapped to a workspace
    pub skipped: usize,
}

/// Registry of workspaces and their run state
#[derive(Debug)]
pub struct WorkspaceRegistry {
    state: RwLock<RegistryState>,
    log_capacity: usize,
}

impl Default for WorkspaceRegistry {
    fn default() -> Self {
        Self::new(berth_foundation::DEFAULT_LOG_CAPACITY)
    }
}

impl WorkspaceRegistry {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            log_capacity: log_capacity.max(1),
        }
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    /// Register a workspace with its initial status and log entries
    pub fn register(&self, workspace: Workspace, status: ExecutionStatus, entries: Vec<LogEntry>) {
        let mut logs = WorkspaceLogBuffer::with_capacity(self.log_capacity);
        for entry in entries {
            logs.push(entry);
        }

        let id = workspace.id.clone();
        let mut state = self.state.write();
        state.workspaces.insert(id.clone(), workspace);
        state.statuses.insert(id.clone(), status);
        state.logs.insert(id.clone(), logs);
        state.generation += 1;
        let generation = state.generation;
        state.registered_at.insert(id.clone(), generation);
        debug!(workspace = %id, generation, "Registered workspace");
    }

    pub fn get(&self, id: &WorkspaceId) -> Option<Workspace> {
        self.state.read().workspaces.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Workspace> {
        self.state.read().workspaces.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().workspaces.is_empty()
    }

    /// Resolve by id, then by exact host path, then any workspace when
    /// neither is given
    pub fn resolve(&self, id: Option<&str>, path: Option<&Path>) -> Option<Workspace> {
        let id = id.map(str::trim).filter(|s| !s.is_empty());
        let path = path.filter(|p| !p.as_os_str().is_empty());
        let state = self.state.read();

        if let Some(id) = id {
            if let Some(workspace) = state.workspaces.get(&WorkspaceId::from(id)) {
                return Some(workspace.clone());
            }
        }

        if let Some(path) = path {
            let canonical = std::fs::canonicalize(path).ok();
            return state
                .workspaces
                .values()
                .find(|w| w.host_path == path || canonical.as_deref() == Some(w.host_path.as_path()))
                .cloned();
        }

        if id.is_some() {
            return None;
        }

        state.workspaces.values().next().cloned()
    }

    /// Like [`WorkspaceRegistry::resolve`], failing with `NoActiveWorkspace`
    pub fn require(&self, id: Option<&str>, path: Option<&Path>) -> Result<Workspace> {
        self.resolve(id, path).ok_or(Error::NoActiveWorkspace)
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self, id: &WorkspaceId) -> Option<ExecutionStatus> {
        self.state.read().statuses.get(id).cloned()
    }

    /// Overwrite the status of a registered workspace
    pub fn set_status(&self, id: &WorkspaceId, status: ExecutionStatus) {
        let mut state = self.state.write();
        if state.workspaces.contains_key(id) {
            state.statuses.insert(id.clone(), status);
        }
    }

    /// Replace the status with `f(current)` while a run is in flight
    pub fn update_running_status<F>(&self, id: &WorkspaceId, f: F)
    where
        F: FnOnce(&ExecutionStatus) -> ExecutionStatus,
    {
        let mut state = self.state.write();
        if let Some(status) = state.statuses.get_mut(id) {
            if status.status.is_running() {
                *status = f(status);
            }
        }
    }

    /// Atomically move the workspace into the running state.
    ///
    /// Fails with `WorkspaceBusy` while another run is in flight, leaving its
    /// status untouched.
    pub fn try_begin_run(&self, id: &WorkspaceId, command: &str) -> Result<ExecutionStatus> {
        let mut state = self.state.write();
        if !state.workspaces.contains_key(id) {
            return Err(Error::NoActiveWorkspace);
        }

        if state.statuses.get(id).is_some_and(|s| s.status.is_running()) {
            return Err(Error::WorkspaceBusy(id.to_string()));
        }

        let status = ExecutionStatus::starting(command);
        state.statuses.insert(id.clone(), status.clone());
        Ok(status)
    }

    // ========================================================================
    // Logs
    // ========================================================================

    /// Append a log entry to a registered workspace
    pub fn append_log(&self, id: &WorkspaceId, entry: LogEntry) {
        let capacity = self.log_capacity;
        let mut state = self.state.write();
        if !state.workspaces.contains_key(id) {
            return;
        }
        state
            .logs
            .entry(id.clone())
            .or_insert_with(|| WorkspaceLogBuffer::with_capacity(capacity))
            .push(entry);
    }

    /// Log snapshot, oldest first
    pub fn logs(&self, id: &WorkspaceId) -> Vec<LogEntry> {
        self.state
            .read()
            .logs
            .get(id)
            .map(WorkspaceLogBuffer::to_vec)
            .unwrap_or_default()
    }

    /// Follow entries appended from now on
    pub fn subscribe_logs(&self, id: &WorkspaceId) -> Option<broadcast::Receiver<LogEntry>> {
        self.state.read().logs.get(id).map(WorkspaceLogBuffer::subscribe)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Rebuild the workspace set from the runtime's managed containers.
    ///
    /// When the runtime cannot be queried the registry is left untouched and
    /// `ReconciliationSkipped` is returned.
    pub async fn reconcile_from_runtime(
        &self,
        runtime: &dyn ContainerRuntime,
        config: &BerthConfig,
    ) -> Result<ReconcileReport> {
        let snapshot = self.state.read().generation;
        let filter = format!("{}=true", config.label(label::MANAGED));

        let ids = runtime.list_managed(&filter).await.map_err(|e| {
            warn!("Reconciliation skipped, cannot list containers: {}", e);
            Error::ReconciliationSkipped(e.user_message())
        })?;

        let mut containers = Vec::with_capacity(ids.len());
        for id in &ids {
            match runtime.inspect(id).await {
                Ok(details) => containers.push(details),
                Err(Error::NotFound(_)) => debug!("Container {} vanished during reconciliation", id),
                Err(e) => {
                    warn!("Reconciliation skipped, cannot inspect {}: {}", id, e);
                    return Err(Error::ReconciliationSkipped(e.user_message()));
                }
            }
        }

        let mut report = ReconcileReport::default();
        let mut state = self.state.write();
        let previous = std::mem::take(&mut *state);
        let RegistryState {
            workspaces: mut old_workspaces,
            statuses: mut old_statuses,
            logs: mut old_logs,
            generation,
            registered_at: mut old_registered_at,
        } = previous;
        state.generation = generation;

        for details in &containers {
            let Some(mut workspace) = workspace_from_container(details, config) else {
                report.skipped += 1;
                continue;
            };
            if state.workspaces.contains_key(&workspace.id) {
                warn!(workspace = %workspace.id, container = %details.name, "Duplicate workspace id, skipping container");
                report.skipped += 1;
                continue;
            }

            let id = workspace.id.clone();
            if let Some(old) = old_workspaces.remove(&id) {
                if details.label(&config.label(label::CREATED_AT)).is_none() {
                    workspace.created_at = old.created_at;
                }
            }

            let status = old_statuses.remove(&id);
            let logs = old_logs.remove(&id);
            let (status, logs) = match (status, logs) {
                (Some(status), Some(logs)) => (status, logs),
                (status, logs) => {
                    report.recovered += 1;
                    let mut logs =
                        logs.unwrap_or_else(|| WorkspaceLogBuffer::with_capacity(self.log_capacity));
                    logs.push_info(format!(
                        "Workspace {} {} (container {})",
                        workspace.name, RECOVERED_STEP, workspace.container_name
                    ));
                    (
                        status.unwrap_or_else(|| ExecutionStatus::idle(RECOVERED_STEP)),
                        logs,
                    )
                }
            };

            if let Some(registered) = old_registered_at.remove(&id) {
                state.registered_at.insert(id.clone(), registered);
            }
            state.statuses.insert(id.clone(), status);
            state.logs.insert(id.clone(), logs);
            state.workspaces.insert(id, workspace);
        }

        // Registered while the runtime was being enumerated
        for (id, workspace) in old_workspaces {
            let Some(registered) = old_registered_at.remove(&id) else {
                continue;
            };
            if registered > snapshot && !state.workspaces.contains_key(&id) {
                state.registered_at.insert(id.clone(), registered);
                if let Some(status) = old_statuses.remove(&id) {
                    state.statuses.insert(id.clone(), status);
                }
                if let Some(logs) = old_logs.remove(&id) {
                    state.logs.insert(id.clone(), logs);
                }
                state.workspaces.insert(id, workspace);
            }
        }

        report.workspaces = state.workspaces.len();
        info!(
            workspaces = report.workspaces,
            recovered = report.recovered,
            skipped = report.skipped,
            "Reconciled workspaces from {}",
            runtime.name()
        );
        Ok(report)
    }
}

/// Rebuild a workspace from container labels and mounts.
///
/// Containers without a bind mount at the code mount path, or without a
/// recognizable state store, yield `None`.
pub fn workspace_from_container(
    details: &ContainerDetails,
    config: &BerthConfig,
) -> Option<Workspace> {
    let label_of = |key: &str| details.label(&config.label(key)).map(str::to_string);

    let code_mount_path = label_of(label::CODE_MOUNT).unwrap_or_else(|| config.code_mount_path.clone());
    let code_mount = details.mount_at(&code_mount_path).filter(|m| m.is_bind())?;
    let host_path = code_mount
        .source
        .clone()
        .or_else(|| label_of(label::HOST_PATH))
        .map(PathBuf::from)?;

    let home_path = label_of(label::HOME_PATH).unwrap_or_else(|| config.home_path.clone());
    let state_store = match details.mount_at(&home_path) {
        Some(m) if m.is_volume() && m.name.is_some() => StateStore::ManagedVolume {
            name: m.name.clone()?,
        },
        Some(m) if m.is_bind() && m.source.is_some() => StateStore::HostBind {
            path: PathBuf::from(m.source.clone()?),
        },
        _ => match (label_of(label::STATE_VOLUME), label_of(label::STATE_HOST_PATH)) {
            (Some(name), None) => StateStore::ManagedVolume { name },
            (None, Some(path)) => StateStore::HostBind {
                path: PathBuf::from(path),
            },
            _ => return None,
        },
    };

    let container_name = if details.name.is_empty() {
        details.id.clone()
    } else {
        details.name.clone()
    };

    let id = label_of(label::ID)
        .map(WorkspaceId::from)
        .unwrap_or_else(|| WorkspaceId::from_container(&details.id));

    let name = label_of(label::NAME).unwrap_or_else(|| container_name.clone());

    let created_at = label_of(label::CREATED_AT)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(Workspace {
        id,
        name,
        host_path,
        container_name,
        code_mount_path,
        home_path,
        state_store,
        image: details.image.clone(),
        created_at,
    })
}
