//! Snapshots of the store file, taken before a run opens it for writes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;

use crate::error::{AppError, Result};

pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// `database.sqlite` at 2024-05-01 08:30:00 becomes `database-20240501-083000.sqlite`.
pub fn backup_file_name(store_path: &Path, timestamp: DateTime<Utc>) -> String {
    let stem = store_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "database".to_string());
    let stamp = timestamp.format(BACKUP_TIMESTAMP_FORMAT);
    match store_path.extension() {
        Some(ext) => format!("{stem}-{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{stamp}"),
    }
}

/// Copy the store file verbatim into `backup_dir`.
///
/// Returns `None` when there is no store file yet (first run).
pub async fn snapshot(
    store_path: &Path,
    backup_dir: &Path,
    timestamp: DateTime<Utc>,
) -> Result<Option<PathBuf>> {
    if !fs::try_exists(store_path).await.unwrap_or(false) {
        tracing::info!(
            "No store at {} yet, nothing to back up",
            store_path.display()
        );
        return Ok(None);
    }

    fs::create_dir_all(backup_dir).await.map_err(|e| {
        AppError::Backup(format!(
            "failed to create backup directory {}: {e}",
            backup_dir.display()
        ))
    })?;

    let name = backup_file_name(store_path, timestamp);
    let mut target = backup_dir.join(&name);
    let mut attempt = 1;
    while fs::try_exists(&target).await.unwrap_or(false) {
        target = backup_dir.join(format!("{attempt}-{name}"));
        attempt += 1;
    }

    let bytes = fs::copy(store_path, &target).await.map_err(|e| {
        AppError::Backup(format!(
            "failed to copy {} to {}: {e}",
            store_path.display(),
            target.display()
        ))
    })?;

    tracing::info!("Backed up store ({} bytes) to {}", bytes, target.display());
    Ok(Some(target))
}
