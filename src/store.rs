//! JSON state files.
//!
//! One value object per file. Each write goes to its own uniquely named temp
//! file beside the target, which is fsynced and renamed over it, so a crash
//! or a concurrent writer leaves either the old or a complete new file on
//! disk, never a torn one.

use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ControlError, Result};

/// Reads and decodes `path`. A missing file is `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ControlError::Persistence(format!(
                "failed to read {}: {e}",
                path.display()
            )))
        }
    };

    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        ControlError::Persistence(format!("invalid JSON in {}: {e}", path.display()))
    })
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| ControlError::Persistence(format!("failed to encode {}: {e}", path.display())))?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || replace_file(&target, &body))
        .await
        .map_err(|e| ControlError::Persistence(format!("write of {} aborted: {e}", path.display())))?
}

fn replace_file(path: &Path, body: &[u8]) -> Result<()> {
    let persist_err =
        |what: &str, e: std::io::Error| ControlError::Persistence(format!("{what} {}: {e}", path.display()));

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| persist_err("failed to create parent of", e))?;

    let mut prefix = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state".into());
    prefix.push(".");
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| persist_err("failed to create temp file for", e))?;
    tmp.write_all(body).map_err(|e| persist_err("failed to write", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| persist_err("failed to sync", e))?;

    // The temp file is removed on drop if the rename fails.
    tmp.persist(path)
        .map_err(|e| persist_err("failed to replace", e.error))?;
    Ok(())
}

/// Deletes `path`; returns whether a file was there.
pub async fn remove(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ControlError::Persistence(format!(
            "failed to delete {}: {e}",
            path.display()
        ))),
    }
}
