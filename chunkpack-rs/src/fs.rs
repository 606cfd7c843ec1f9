//! Filesystem helpers. All writes replace whole files so racing writers of the
//! same content-addressed name cannot corrupt each other.

use crate::error::{BundleError, BundleResult};
use crate::hash::SHORT_HASH_LEN;
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub async fn exists_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

pub async fn ensure_dir(path: &Path) -> BundleResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| BundleError::io(path, err))
}

/// Writes `text` to `path`, creating parent directories as needed.
pub async fn ensure_text_file(path: &Path, text: &str) -> BundleResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }
    tokio::fs::write(path, text)
        .await
        .map_err(|err| BundleError::io(path, err))
}

/// Resolves a relative path against the current working directory.
pub fn absolute_path(path: &Path) -> BundleResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| BundleError::io(path, err))?;
    Ok(cwd.join(path))
}

/// Best-effort removal; a missing file is not an error.
pub async fn lazy_remove(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove {}: {}", path.display(), err),
    }
}

/// Removes earlier builds of the chunk `stem` from `dir`, keeping `keep`.
pub async fn clear_stale_bundles(dir: &Path, stem: &str, keep: &str) {
    let prefix = format!("{stem}.bundle.");
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        // `rest` is `<hash8>.js` for a bundle; anything else (entry files,
        // longer chunk names sharing the prefix) stays.
        let is_bundle = rest
            .strip_suffix(".js")
            .map(|hash| {
                hash.len() == SHORT_HASH_LEN && hash.chars().all(|c| c.is_ascii_hexdigit())
            })
            .unwrap_or(false);
        if is_bundle && name != keep {
            debug!("Removing stale bundle {}", name);
            lazy_remove(&entry.path()).await;
        }
    }
}
