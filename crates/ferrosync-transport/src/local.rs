//! Local filesystem side of a sync run
//!
//! Failures here are [`Error::Filesystem`]: the local side of the run is unusable and the
//! retry helper will not try again.

use chrono::{DateTime, Utc};
use ferrosync_types::{Entry, Error, Result};
use std::path::Path;
use tracing::debug;

/// List a local directory
pub async fn list_dir(path: &Path) -> Result<Vec<Entry>> {
    let mut reader = tokio::fs::read_dir(path)
        .await
        .map_err(|e| Error::filesystem(path, format!("cannot list directory: {e}")))?;

    let mut entries = Vec::new();
    while let Some(item) = reader
        .next_entry()
        .await
        .map_err(|e| Error::filesystem(path, format!("cannot read directory entry: {e}")))?
    {
        let name = item.file_name().to_string_lossy().into_owned();
        let metadata = match item.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %item.path().display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let entry = if metadata.is_dir() {
            Entry::directory(name)
        } else {
            Entry::file(name, metadata.len())
        };
        let entry = match metadata.modified() {
            Ok(modified) => entry.with_modified(DateTime::<Utc>::from(modified)),
            Err(_) => entry,
        };
        entries.push(entry);
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Create a directory and its parents
pub async fn create_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::filesystem(path, format!("cannot create directory: {e}")))
}

/// Whether a local file exists
pub async fn file_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| Error::filesystem(path, format!("cannot stat file: {e}")))
}

/// Remove a local file
pub async fn remove_file(path: &Path) -> Result<()> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| Error::filesystem(path, format!("cannot remove file: {e}")))
}
