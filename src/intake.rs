//! Upload validation and storage.
//!
//! Every accepted upload is written under the images directory with a name
//! derived from the upload time, its content hash and a random suffix, so
//! concurrent jobs never share a path.

use crate::{
    config::Config,
    util::{ensure_dir, sha256_hex, unix_millis},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("No image file uploaded")]
    Empty,
    #[error("Only image files are allowed! (got {0})")]
    UnsupportedType(String),
    #[error("upload exceeds limit: {size} > {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("storing upload: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArtifact {
    /// Absolute location handed to the worker.
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub size: u64,
    pub modified: String,
    pub url: String,
}

pub fn prepare_dirs(cfg: &Config) -> Result<()> {
    for dir in [cfg.images_dir(), cfg.regenerated_dir()] {
        if dir.exists() {
            debug!("directory exists: {}", dir.display());
        } else {
            ensure_dir(&dir)?;
            info!("created directory: {}", dir.display());
        }
    }
    Ok(())
}

/// Checks name, declared type and size. Returns the lowercased extension.
pub fn validate(
    cfg: &Config,
    original_name: &str,
    content_type: Option<&str>,
    size: u64,
) -> Result<String, IntakeError> {
    if size == 0 {
        return Err(IntakeError::Empty);
    }
    let ext = Path::new(original_name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .ok_or_else(|| IntakeError::UnsupportedType(original_name.to_string()))?;
    if !is_allowed(cfg, &ext) {
        return Err(IntakeError::UnsupportedType(ext));
    }

    if let Some(mime) = content_type {
        let mime = mime.trim().to_ascii_lowercase();
        let subtype = mime.strip_prefix("image/").unwrap_or_default();
        if !is_allowed(cfg, subtype) {
            return Err(IntakeError::UnsupportedType(mime));
        }
    }

    let limit = cfg.limits.max_upload_bytes;
    if size > limit {
        return Err(IntakeError::TooLarge { size, limit });
    }
    Ok(ext)
}

fn is_allowed(cfg: &Config, ext: &str) -> bool {
    cfg.limits
        .allowed_extensions
        .iter()
        .any(|a| a.eq_ignore_ascii_case(ext))
}

pub fn unique_name(bytes: &[u8], ext: &str) -> String {
    let digest = sha256_hex(bytes);
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}.{}", unix_millis(), &digest[..12], &nonce[..8], ext)
}

pub fn store_upload(
    cfg: &Config,
    original_name: &str,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<StoredArtifact, IntakeError> {
    let ext = validate(cfg, original_name, content_type, bytes.len() as u64)?;
    let dir = cfg.images_dir();
    std::fs::create_dir_all(&dir)?;

    let file_name = unique_name(bytes, &ext);
    let target = dir.join(&file_name);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)?;
    file.write_all(bytes)?;
    file.flush()?;

    let path = target.canonicalize()?;
    debug!("stored upload {} -> {}", original_name, path.display());
    Ok(StoredArtifact {
        path,
        file_name,
        bytes: bytes.len() as u64,
    })
}

/// Stores a local file, rejecting oversize inputs before reading them.
pub fn store_file(
    cfg: &Config,
    source: &Path,
    content_type: Option<&str>,
) -> Result<StoredArtifact, IntakeError> {
    let name = source
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let size = std::fs::metadata(source)?.len();
    validate(cfg, &name, content_type, size)?;
    let bytes = std::fs::read(source)?;
    store_upload(cfg, &name, content_type, &bytes)
}

pub fn list_artifacts(dir: &Path, public_base: &str) -> Result<Vec<ArtifactEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| time::OffsetDateTime::from(t).format(&Rfc3339).ok())
            .unwrap_or_default();
        out.push(ArtifactEntry {
            url: format!("{}/{}", public_base.trim_end_matches('/'), name),
            name,
            size: meta.len(),
            modified,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}
