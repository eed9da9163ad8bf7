//! Workspace definition and container label codec

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Maximum slug length
const MAX_SLUG_LEN: usize = 40;

/// Slug used when the input has no usable characters
const FALLBACK_SLUG: &str = "workspace";

/// Unique identifier for a workspace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    /// Generate a new random id
    pub fn generate() -> Self {
        Self(format!("ws-{}", Uuid::new_v4().simple()))
    }

    /// Stable id derived from a container id
    pub fn from_container(container_id: &str) -> Self {
        let short: String = container_id.chars().take(12).collect();
        Self(format!("ws-{}", short))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkspaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Persistent home/state storage of a workspace. Exactly one kind is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StateStore {
    /// Named volume created for this workspace
    ManagedVolume { name: String },
    /// Host directory supplied by the user
    HostBind { path: PathBuf },
}

impl StateStore {
    pub fn managed_volume(&self) -> Option<&str> {
        match self {
            StateStore::ManagedVolume { name } => Some(name),
            StateStore::HostBind { .. } => None,
        }
    }

    pub fn host_bind_path(&self) -> Option<&PathBuf> {
        match self {
            StateStore::HostBind { path } => Some(path),
            StateStore::ManagedVolume { .. } => None,
        }
    }

    /// `volume <name>` / `bind <path>`
    pub fn describe(&self) -> String {
        match self {
            StateStore::ManagedVolume { name } => format!("volume {}", name),
            StateStore::HostBind { path } => format!("bind {}", path.display()),
        }
    }
}

/// A host directory bound to a standing container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    /// Absolute host path of the code
    pub host_path: PathBuf,
    pub container_name: String,
    pub code_mount_path: String,
    pub home_path: String,
    pub state_store: StateStore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Labels identifying this workspace on its container
    pub fn labels(&self, prefix: &str) -> BTreeMap<String, String> {
        let key = |k: &str| format!("{}.{}", prefix, k);
        let mut labels = BTreeMap::new();

        labels.insert(key(label::MANAGED), "true".to_string());
        labels.insert(key(label::ID), self.id.to_string());
        labels.insert(key(label::NAME), self.name.clone());
        labels.insert(
            key(label::HOST_PATH),
            self.host_path.to_string_lossy().into_owned(),
        );
        labels.insert(key(label::CODE_MOUNT), self.code_mount_path.clone());
        labels.insert(key(label::HOME_PATH), self.home_path.clone());
        labels.insert(key(label::CREATED_AT), self.created_at.to_rfc3339());

        match &self.state_store {
            StateStore::ManagedVolume { name } => {
                labels.insert(key(label::STATE_VOLUME), name.clone());
            }
            StateStore::HostBind { path } => {
                labels.insert(
                    key(label::STATE_HOST_PATH),
                    path.to_string_lossy().into_owned(),
                );
            }
        }

        labels
    }
}

/// Label keys (relative to the configured prefix)
pub mod label {
    pub const MANAGED: &str = "managed";
    pub const ID: &str = "workspace.id";
    pub const NAME: &str = "workspace.name";
    pub const HOST_PATH: &str = "workspace.host-path";
    pub const CODE_MOUNT: &str = "workspace.code-mount";
    pub const HOME_PATH: &str = "workspace.home-path";
    pub const STATE_VOLUME: &str = "workspace.state-volume";
    pub const STATE_HOST_PATH: &str = "workspace.state-host-path";
    pub const CREATED_AT: &str = "workspace.created-at";
}

/// Lowercase, `[a-z0-9_-]` only, at most 40 characters
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = false;

    for c in input.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }

    let slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Time based suffix appended to container and volume names
pub fn name_suffix(now: DateTime<Utc>) -> String {
    format!("{:06}", now.timestamp_millis().rem_euclid(1_000_000))
}
