// Backup Storage - filesystem primitives the manager is built on

use super::types::BackupError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// A regular file found in the backup directory
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// File operations used by [`BackupManager`](super::BackupManager).
///
/// Every method takes full paths; the manager owns path layout.
#[async_trait]
pub trait BackupStorage: Send + Sync {
    /// Create `dir` if missing. Returns `true` when it had to be created.
    async fn ensure_dir(&self, dir: &Path) -> Result<bool, BackupError>;

    /// True when `path` exists and is a regular file
    async fn exists(&self, path: &Path) -> bool;

    /// Size of the file at `path`, `None` if it does not exist
    async fn size_of(&self, path: &Path) -> Result<Option<u64>, BackupError>;

    /// Copy `from` over `to`, returning the number of bytes copied
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64, BackupError>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, BackupError>;

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), BackupError>;

    async fn remove_file(&self, path: &Path) -> Result<(), BackupError>;

    /// Regular files directly inside `dir`
    async fn list_files(&self, dir: &Path) -> Result<Vec<StoredFile>, BackupError>;
}

/// Local filesystem storage.
///
/// Copies are staged into a hidden sibling file and renamed into place, so a
/// reader of the destination sees either the old or the new contents.
pub struct FileBackupStorage {
    staged_copies: bool,
}

impl FileBackupStorage {
    pub fn new() -> Self {
        Self { staged_copies: true }
    }

    /// Copy straight onto the destination instead of staging through a temp file
    pub fn with_staged_copies(mut self, enabled: bool) -> Self {
        self.staged_copies = enabled;
        self
    }

    fn staging_path(to: &Path) -> PathBuf {
        let file_name = to
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        to.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()))
    }
}

impl Default for FileBackupStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackupStorage for FileBackupStorage {
    async fn ensure_dir(&self, dir: &Path) -> Result<bool, BackupError> {
        if fs::metadata(dir).await.is_ok() {
            return Ok(false);
        }
        fs::create_dir_all(dir)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to create backup directory {}: {}", dir.display(), e)))?;
        debug!(dir = %dir.display(), "Created backup directory");
        Ok(true)
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
    }

    async fn size_of(&self, path: &Path) -> Result<Option<u64>, BackupError> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackupError::Io(format!("Failed to stat {}: {}", path.display(), e))),
        }
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64, BackupError> {
        if !self.staged_copies {
            return fs::copy(from, to).await.map_err(|e| {
                BackupError::Io(format!("Failed to copy {} to {}: {}", from.display(), to.display(), e))
            });
        }

        let staging = Self::staging_path(to);
        let bytes = match fs::copy(from, &staging).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(BackupError::Io(format!(
                    "Failed to copy {} to {}: {}",
                    from.display(),
                    staging.display(),
                    e
                )));
            }
        };

        if let Err(e) = fs::rename(&staging, to).await {
            if let Err(cleanup) = fs::remove_file(&staging).await {
                warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging file");
            }
            return Err(BackupError::Io(format!(
                "Failed to move {} into place at {}: {}",
                staging.display(),
                to.display(),
                e
            )));
        }

        Ok(bytes)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, BackupError> {
        fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BackupError::NotFound(path.display().to_string()),
            _ => BackupError::Io(format!("Failed to read {}: {}", path.display(), e)),
        })
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), BackupError> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to create {}: {}", path.display(), e)))?;
        file.write_all(data)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| BackupError::Io(format!("Failed to flush {}: {}", path.display(), e)))?;
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<(), BackupError> {
        fs::remove_file(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BackupError::NotFound(path.display().to_string()),
            _ => BackupError::Io(format!("Failed to remove {}: {}", path.display(), e)),
        })
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<StoredFile>, BackupError> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to read backup directory: {}", e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::Io(format!("Failed to read directory entry: {}", e)))?
        {
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    warn!(entry = ?entry.path(), error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            files.push(StoredFile {
                name,
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        Ok(files)
    }
}
