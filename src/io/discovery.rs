//! Source file discovery: every `*.json` entry directly inside a directory.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::SOURCE_EXTENSION;
use crate::error::ImportError;

/// List the JSON files in `dir`, sorted by path
///
/// The search is not recursive. Entries are matched on the exact `.json`
/// extension and must resolve to regular files. An empty result is not an
/// error; a missing (or non-directory) path is.
pub async fn discover_json_files(dir: &Path) -> Result<Vec<PathBuf>, ImportError> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(ImportError::DirectoryNotFound(dir.to_path_buf())),
    }

    let discovery_err = |source| ImportError::Discovery {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(discovery_err)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(discovery_err)? {
        let path = entry.path();
        if !has_source_extension(&path) {
            continue;
        }

        // Follows symlinks; dangling links and directories named *.json are skipped
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            _ => debug!(path = %path.display(), "skipping non-file entry"),
        }
    }

    files.sort();
    Ok(files)
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == SOURCE_EXTENSION)
}
