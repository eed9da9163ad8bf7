//! Archive upload - extracts a base64 zip payload into a workspace

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use berth_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

/// Result of a successful extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub extracted_files: usize,
    pub target_path: PathBuf,
}

/// Check the request and decode the payload
pub fn decode_upload(file_name: &str, payload_base64: &str) -> Result<Vec<u8>> {
    let file_name = file_name.trim();
    if !file_name.to_ascii_lowercase().ends_with(".zip") {
        return Err(Error::InvalidInput("only .zip files are accepted".to_string()));
    }

    let payload = payload_base64.trim();
    let payload = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    if payload.is_empty() {
        return Err(Error::InvalidInput("zip payload is empty".to_string()));
    }

    STANDARD
        .decode(payload)
        .map_err(|e| Error::InvalidInput(format!("zip payload is not valid base64: {}", e)))
}

/// Extract a zip archive held in memory into `target`.
///
/// The archive is staged in a temporary directory that is removed afterwards.
/// Existing files are overwritten; entries escaping `target` are rejected.
pub fn extract_zip(file_name: &str, bytes: &[u8], target: &Path) -> Result<UploadResult> {
    let staging = tempfile::Builder::new().prefix("berth-upload-").tempdir()?;
    let staged = staging.path().join(staged_name(file_name));
    fs::write(&staged, bytes)?;

    let extracted_files = extract_file(&staged, target)?;
    debug!(
        "Extracted {} files from {} into {}",
        extracted_files,
        file_name,
        target.display()
    );

    Ok(UploadResult {
        extracted_files,
        target_path: target.to_path_buf(),
    })
}

fn extract_file(archive_path: &Path, target: &Path) -> Result<usize> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| Error::InvalidInput(format!("invalid zip archive: {}", e)))?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::InvalidInput(format!("failed to read zip entry: {}", e)))?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::InvalidInput(format!(
                "zip entry escapes the target directory: {}",
                entry.name()
            )));
        };
        let out_path = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let mode = (mode & 0o777) | 0o600;
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
            }
        }

        extracted += 1;
    }

    Ok(extracted)
}

/// File name safe to create inside the staging directory
fn staged_name(file_name: &str) -> String {
    let name: String = file_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.trim_matches('.').is_empty() {
        "upload.zip".to_string()
    } else {
        name
    }
}
