//! Recursive file listing.

use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::error::{BridgeError, Result};

/// List every plain file under `root`, depth first.
///
/// A `root` that is itself a file comes back as the only element. Sibling
/// order is whatever the filesystem returns.
pub async fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let meta = fs::metadata(root)
        .await
        .map_err(|e| BridgeError::from_open(root, e))?;
    if !meta.is_dir() {
        return Ok(vec![root.to_path_buf()]);
    }

    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = entry.map_err(|e| BridgeError::ReadFailure(e.into()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        tracing::debug!(root = %root.display(), files = files.len(), "listed directory");
        Ok(files)
    })
    .await
    .map_err(|e| BridgeError::ReadFailure(std::io::Error::other(e)))?
}

/// Keep only the paths that currently stat as plain files.
pub async fn valid_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut valid = Vec::with_capacity(paths.len());
    for path in paths {
        if let Ok(meta) = fs::metadata(path).await {
            if meta.is_file() {
                valid.push(path.clone());
            }
        }
    }
    valid
}
