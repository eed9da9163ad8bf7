//! Berth Config - layered settings
//!
//! Built-in defaults, then the global file, then the project file, then
//! `BERTH_*` environment variables, then command line flags. Every layer is a
//! [`ConfigLayer`] whose unset fields leave the lower layers untouched.

use crate::storage::{load_file, JsonStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Config file name inside the global and project stores
pub const BERTH_CONFIG_FILE: &str = "config.json";

/// Default workspace image
pub const DEFAULT_IMAGE: &str = "ghcr.io/openai/codex-universal:latest";

/// Default in-container code mount
pub const DEFAULT_CODE_MOUNT_PATH: &str = "/workspace/project";

/// Default in-container home/state mount
pub const DEFAULT_HOME_PATH: &str = "/codex-home";

/// Default log ring buffer capacity per workspace
pub const DEFAULT_LOG_CAPACITY: usize = 500;

// ============================================================================
// Runtime kind
// ============================================================================

/// Which container runtime backend drives the workspaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// `docker` binary
    #[default]
    DockerCli,
    /// `podman` binary (docker compatible CLI)
    PodmanCli,
    /// Docker Engine API over the local socket
    DockerApi,
}

impl RuntimeKind {
    /// Binary name for the CLI backends
    pub fn program(&self) -> &'static str {
        match self {
            RuntimeKind::DockerCli | RuntimeKind::DockerApi => "docker",
            RuntimeKind::PodmanCli => "podman",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::DockerCli => "docker-cli",
            RuntimeKind::PodmanCli => "podman-cli",
            RuntimeKind::DockerApi => "docker-api",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker-cli" | "docker" => Ok(RuntimeKind::DockerCli),
            "podman-cli" | "podman" => Ok(RuntimeKind::PodmanCli),
            "docker-api" | "api" => Ok(RuntimeKind::DockerApi),
            other => Err(Error::Config(format!(
                "Unknown runtime '{}' (expected docker-cli, podman-cli or docker-api)",
                other
            ))),
        }
    }
}

// ============================================================================
// Resolved config
// ============================================================================

/// Fully resolved berth settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BerthConfig {
    pub runtime: RuntimeKind,
    pub default_image: String,
    pub code_mount_path: String,
    pub home_path: String,
    /// Prefix of every container label (`<prefix>.managed`, ...)
    pub label_prefix: String,
    pub heartbeat_secs: u64,
    pub log_capacity: usize,
    pub listen: String,
    /// Shell template for prompts; `{prompt}` is replaced with the quoted prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    pub artifact_extensions: Vec<String>,
    pub artifact_excluded_suffixes: Vec<String>,
    pub artifact_excluded_dirs: Vec<String>,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            default_image: DEFAULT_IMAGE.to_string(),
            code_mount_path: DEFAULT_CODE_MOUNT_PATH.to_string(),
            home_path: DEFAULT_HOME_PATH.to_string(),
            label_prefix: "berth".to_string(),
            heartbeat_secs: 10,
            log_capacity: DEFAULT_LOG_CAPACITY,
            listen: "127.0.0.1:8787".to_string(),
            prompt_template: None,
            artifact_extensions: vec!["jar".to_string()],
            artifact_excluded_suffixes: vec!["-sources".to_string(), "-javadoc".to_string()],
            artifact_excluded_dirs: ["node_modules", ".git", ".gradle", ".idea"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl BerthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Defaults, global file, project file, then environment
    pub fn load() -> Result<Self> {
        Self::load_layers(None)
    }

    /// Like [`BerthConfig::load`], with an explicit file layered on top of the
    /// project file
    pub fn load_with_file(path: Option<&Path>) -> Result<Self> {
        Self::load_layers(path)
    }

    fn load_layers(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::new();

        let stores = [JsonStore::global(), JsonStore::current_project()];
        for store in stores.into_iter().flatten() {
            if let Some(layer) = store.load_optional::<ConfigLayer>(BERTH_CONFIG_FILE)? {
                config.merge(layer);
            }
        }

        if let Some(path) = explicit {
            config.merge(load_file::<ConfigLayer>(path)?);
        }

        config.merge(ConfigLayer::from_env()?);
        Ok(config)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Apply a layer (set fields in `layer` win)
    pub fn merge(&mut self, layer: ConfigLayer) {
        if let Some(runtime) = layer.runtime {
            self.runtime = runtime;
        }
        if let Some(image) = layer.default_image {
            self.default_image = image;
        }
        if let Some(path) = layer.code_mount_path {
            self.code_mount_path = path;
        }
        if let Some(path) = layer.home_path {
            self.home_path = path;
        }
        if let Some(prefix) = layer.label_prefix {
            self.label_prefix = prefix;
        }
        if let Some(secs) = layer.heartbeat_secs {
            self.heartbeat_secs = secs.max(1);
        }
        if let Some(capacity) = layer.log_capacity {
            self.log_capacity = capacity.max(1);
        }
        if let Some(listen) = layer.listen {
            self.listen = listen;
        }
        if layer.prompt_template.is_some() {
            self.prompt_template = layer.prompt_template;
        }
        if let Some(exts) = layer.artifact_extensions {
            self.artifact_extensions = exts;
        }
        if let Some(suffixes) = layer.artifact_excluded_suffixes {
            self.artifact_excluded_suffixes = suffixes;
        }
        if let Some(dirs) = layer.artifact_excluded_dirs {
            self.artifact_excluded_dirs = dirs;
        }
    }

    /// Full label key for `key` under the configured prefix
    pub fn label(&self, key: &str) -> String {
        format!("{}.{}", self.label_prefix, key)
    }
}

// ============================================================================
// Layer
// ============================================================================

/// One partial config layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_mount_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_extensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_excluded_suffixes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_excluded_dirs: Option<Vec<String>>,
}

impl ConfigLayer {
    /// Layer built from `BERTH_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Layer built from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            runtime: get("BERTH_RUNTIME").map(|v| v.parse()).transpose()?,
            default_image: get("BERTH_IMAGE"),
            code_mount_path: get("BERTH_CODE_MOUNT"),
            home_path: get("BERTH_HOME_PATH"),
            listen: get("BERTH_LISTEN"),
            prompt_template: get("BERTH_PROMPT_TEMPLATE"),
            ..Default::default()
        })
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = Some(image.into());
        self
    }

    pub fn listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = Some(listen.into());
        self
    }
}
