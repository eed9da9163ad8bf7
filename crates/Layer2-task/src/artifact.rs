//! Build artifact lookup inside a workspace host directory

use berth_foundation::BerthConfig;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Which files count as build artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFilter {
    /// Lowercase extensions without the dot
    pub extensions: Vec<String>,
    /// File stem suffixes that disqualify a file (`-sources`, `-javadoc`)
    pub excluded_suffixes: Vec<String>,
    /// Directory names never descended into
    pub excluded_dirs: Vec<String>,
}

impl ArtifactFilter {
    pub fn from_config(config: &BerthConfig) -> Self {
        Self {
            extensions: config
                .artifact_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            excluded_suffixes: config.artifact_excluded_suffixes.clone(),
            excluded_dirs: config.artifact_excluded_dirs.clone(),
        }
    }

    /// JAR files, minus sources and javadoc bundles
    pub fn jar() -> Self {
        Self::from_config(&BerthConfig::default())
    }

    fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.iter().any(|d| d == name)
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        if !self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            return false;
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        !self
            .excluded_suffixes
            .iter()
            .any(|suffix| stem.ends_with(suffix.as_str()))
    }
}

/// Most recently modified artifact under `root`, if any
pub fn find_latest_artifact(root: &Path, filter: &ArtifactFilter) -> Option<PathBuf> {
    let dir_filter = filter.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir
                && entry.depth() > 0
                && dir_filter.is_excluded_dir(&entry.file_name().to_string_lossy()))
        })
        .build();

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) || !filter.matches(entry.path()) {
            continue;
        }

        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        if latest.as_ref().map_or(true, |(time, _)| modified > *time) {
            latest = Some((modified, entry.into_path()));
        }
    }

    if let Some((_, path)) = &latest {
        debug!("Latest artifact under {}: {}", root.display(), path.display());
    }
    latest.map(|(_, path)| path)
}
