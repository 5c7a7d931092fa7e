// Backup Manager - snapshot lifecycle and safe restore of the live database

use super::naming::{
    self, collision_seq, has_backup_extension, sidecar_name, snapshot_name, validate_name,
};
use super::storage::{BackupStorage, FileBackupStorage, StoredFile};
use super::types::{
    BackupError, BackupKind, BackupRecord, BackupSidecar, BackupStats, CleanupResult,
    DownloadPayload, RestoreOutcome, RestorePhase, SafetyCopyRetention, VerificationResult,
};
use crate::config::BackupConfig;
use crate::metrics::BackupMetrics;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const MAX_NAME_ATTEMPTS: u32 = 1000;

pub struct BackupManager {
    config: BackupConfig,
    storage: Arc<dyn BackupStorage>,
}

impl BackupManager {
    pub fn new(config: BackupConfig) -> Self {
        Self::with_storage(config, Arc::new(FileBackupStorage::new()))
    }

    pub fn with_storage(config: BackupConfig, storage: Arc<dyn BackupStorage>) -> Self {
        Self { config, storage }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    fn backup_path(&self, name: &str) -> PathBuf {
        self.config.backup_dir.join(name)
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.config.backup_dir.join(sidecar_name(name))
    }

    fn database_file_name(&self) -> String {
        self.config
            .database_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn checksum(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    // First free `backup_<kind>_<ts>[-N].db` in the backup directory
    async fn unique_snapshot_path(
        &self,
        kind: BackupKind,
        created_at: DateTime<Utc>,
    ) -> Result<(String, PathBuf), BackupError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = snapshot_name(kind, created_at, attempt);
            let path = self.backup_path(&name);
            if !self.storage.exists(&path).await {
                return Ok((name, path));
            }
        }
        Err(BackupError::WriteFailure(format!(
            "no free snapshot name for {} at {}",
            kind,
            naming::format_timestamp(created_at)
        )))
    }

    async fn read_sidecar(&self, name: &str) -> Option<BackupSidecar> {
        let path = self.sidecar_path(name);
        if !self.storage.exists(&path).await {
            return None;
        }
        let raw = match self.storage.read_file(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(backup = %name, error = %e, "Failed to read sidecar, falling back to name");
                return None;
            }
        };
        match serde_json::from_slice::<BackupSidecar>(&raw) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!(backup = %name, error = %e, "Malformed sidecar, falling back to name");
                None
            }
        }
    }

    async fn write_sidecar(&self, name: &str, sidecar: &BackupSidecar) -> Result<(), BackupError> {
        let json = serde_json::to_vec_pretty(sidecar)
            .map_err(|e| BackupError::Serialization(format!("Failed to serialize sidecar: {}", e)))?;
        self.storage.write_file(&self.sidecar_path(name), &json).await
    }

    async fn remove_sidecar(&self, name: &str) {
        let path = self.sidecar_path(name);
        if self.storage.exists(&path).await {
            if let Err(e) = self.storage.remove_file(&path).await {
                warn!(backup = %name, error = %e, "Failed to remove sidecar");
            }
        }
    }

    // Copy the file at `path` into a snapshot record plus sidecar
    async fn describe_new_snapshot(
        &self,
        name: &str,
        path: &Path,
        kind: BackupKind,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<BackupRecord, BackupError> {
        let data = self.storage.read_file(path).await?;
        let checksum = Self::checksum(&data);
        let sidecar = BackupSidecar {
            kind,
            description: description.clone(),
            created_at,
            size_bytes: data.len() as u64,
            checksum: checksum.clone(),
            source: self.database_file_name(),
        };
        if let Err(e) = self.write_sidecar(name, &sidecar).await {
            // Listing still works from the file name
            warn!(backup = %name, error = %e, "Failed to write sidecar");
        }

        Ok(BackupRecord {
            name: name.to_string(),
            size: data.len() as u64,
            created_at,
            kind,
            description,
            checksum: Some(checksum),
        })
    }

    /// Copy the live database into a new snapshot.
    pub async fn create_backup(
        &self,
        kind: BackupKind,
        description: Option<&str>,
    ) -> Result<BackupRecord, BackupError> {
        let started = Instant::now();
        let result = self.create_backup_inner(kind, description).await;
        BackupMetrics::record_operation("create", result.is_ok());
        BackupMetrics::observe_duration("create", started.elapsed().as_secs_f64());
        if let Err(ref e) = result {
            error!(kind = %kind, error = %e, "Backup creation failed");
        }
        result
    }

    async fn create_backup_inner(
        &self,
        kind: BackupKind,
        description: Option<&str>,
    ) -> Result<BackupRecord, BackupError> {
        if kind == BackupKind::PreRestore {
            return Err(BackupError::InvalidInput(
                "pre-restore snapshots are only taken by restore".to_string(),
            ));
        }
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if let Some(ref d) = description {
            if d.chars().count() > self.config.max_description_len {
                return Err(BackupError::InvalidInput(format!(
                    "description exceeds {} characters",
                    self.config.max_description_len
                )));
            }
        }

        let live = &self.config.database_path;
        if !self.storage.exists(live).await {
            return Err(BackupError::NotFound(format!(
                "database file {}",
                live.display()
            )));
        }

        self.storage.ensure_dir(&self.config.backup_dir).await?;

        let created_at = Utc::now();
        let (name, path) = self.unique_snapshot_path(kind, created_at).await?;

        info!(backup = %name, kind = %kind, "Starting backup creation");

        let bytes = self
            .storage
            .copy_file(live, &path)
            .await
            .map_err(|e| BackupError::WriteFailure(e.to_string()))?;
        if !self.storage.exists(&path).await {
            return Err(BackupError::WriteFailure(format!(
                "{} missing after copy",
                name
            )));
        }
        BackupMetrics::record_bytes("create", bytes);

        let record = self
            .describe_new_snapshot(&name, &path, kind, description, created_at)
            .await?;

        info!(backup = %record.name, size = record.size, "Backup created successfully");
        Ok(record)
    }

    async fn resolve_record(&self, file: StoredFile) -> BackupRecord {
        if let Some(sidecar) = self.read_sidecar(&file.name).await {
            return BackupRecord {
                name: file.name,
                size: file.size,
                created_at: sidecar.created_at,
                kind: sidecar.kind,
                description: sidecar.description,
                checksum: Some(sidecar.checksum),
            };
        }

        let parsed = naming::parse_name(&file.name);
        let created_at = parsed
            .as_ref()
            .and_then(|p| p.created_at)
            .or(file.modified)
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        BackupRecord {
            kind: parsed.map(|p| p.kind).unwrap_or(BackupKind::Automatic),
            name: file.name,
            size: file.size,
            created_at,
            description: None,
            checksum: None,
        }
    }

    /// All snapshots, newest first. Creates the backup directory when absent.
    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>, BackupError> {
        if self.storage.ensure_dir(&self.config.backup_dir).await? {
            return Ok(Vec::new());
        }

        let files = self.storage.list_files(&self.config.backup_dir).await?;
        let mut records = Vec::new();
        for file in files.into_iter().filter(|f| has_backup_extension(&f.name)) {
            records.push(self.resolve_record(file).await);
        }

        // Same-millisecond collisions: the higher suffix was written later
        records.sort_by_cached_key(|r| {
            Reverse((r.created_at, collision_seq(&r.name), r.name.clone()))
        });
        debug!(count = records.len(), "Listed backups");
        Ok(records)
    }

    pub async fn download_backup(&self, name: &str) -> Result<DownloadPayload, BackupError> {
        let started = Instant::now();
        let result = self.download_backup_inner(name).await;
        BackupMetrics::record_operation("download", result.is_ok());
        BackupMetrics::observe_duration("download", started.elapsed().as_secs_f64());
        result
    }

    async fn download_backup_inner(&self, name: &str) -> Result<DownloadPayload, BackupError> {
        validate_name(name)?;
        let path = self.backup_path(name);
        if !self.storage.exists(&path).await {
            return Err(BackupError::NotFound(name.to_string()));
        }

        let data = self.storage.read_file(&path).await?;
        let len = data.len() as u64;
        BackupMetrics::record_bytes("download", len);
        debug!(backup = %name, len, "Serving backup download");

        Ok(DownloadPayload {
            name: name.to_string(),
            data: Bytes::from(data),
            len,
        })
    }

    pub async fn delete_backup(&self, name: &str) -> Result<(), BackupError> {
        let started = Instant::now();
        let result = self.delete_backup_inner(name).await;
        BackupMetrics::record_operation("delete", result.is_ok());
        BackupMetrics::observe_duration("delete", started.elapsed().as_secs_f64());
        result
    }

    async fn delete_backup_inner(&self, name: &str) -> Result<(), BackupError> {
        validate_name(name)?;
        let path = self.backup_path(name);
        if !self.storage.exists(&path).await {
            return Err(BackupError::NotFound(name.to_string()));
        }

        if let Err(e) = self.storage.remove_file(&path).await {
            error!(backup = %name, error = %e, "Backup deletion failed");
            return Err(BackupError::DeleteFailure(e.to_string()));
        }
        if self.storage.exists(&path).await {
            return Err(BackupError::DeleteFailure(format!(
                "{} still present after removal",
                name
            )));
        }
        self.remove_sidecar(name).await;

        info!(backup = %name, "Backup deleted");
        Ok(())
    }

    // Mismatch against a recorded checksum means the snapshot must not be restored
    async fn check_integrity(&self, name: &str, path: &Path) -> Result<(), BackupError> {
        let Some(sidecar) = self.read_sidecar(name).await else {
            return Ok(());
        };
        let data = self.storage.read_file(path).await?;
        if Self::checksum(&data) != sidecar.checksum {
            warn!(backup = %name, "Checksum mismatch, refusing to restore");
            return Err(BackupError::Corrupted(name.to_string()));
        }
        Ok(())
    }

    async fn safety_copy_path(
        &self,
        restoring: &str,
        taken_at: DateTime<Utc>,
    ) -> Result<(String, PathBuf), BackupError> {
        let fixed = &self.config.safety_copy_name;
        // Restoring the fixed safety copy itself must not overwrite it first
        if self.config.safety_retention == SafetyCopyRetention::Archive || restoring == fixed {
            self.unique_snapshot_path(BackupKind::PreRestore, taken_at).await
        } else {
            Ok((fixed.clone(), self.backup_path(fixed)))
        }
    }

    fn advance(&self, name: &str, from: RestorePhase, to: RestorePhase) -> RestorePhase {
        debug!(backup = %name, from = ?from, to = ?to, "Restore phase transition");
        to
    }

    // The live file must exist and match the expected size
    async fn live_matches(&self, expected_size: u64) -> bool {
        matches!(
            self.storage.size_of(&self.config.database_path).await,
            Ok(Some(size)) if size == expected_size
        )
    }

    /// Replace the live database with the snapshot `name`.
    ///
    /// The live file is first copied to a safety copy; if the overwrite
    /// cannot be verified the safety copy is copied back and
    /// [`BackupError::RestoreFailure`] reports whether that rollback held.
    pub async fn restore_backup(&self, name: &str) -> Result<RestoreOutcome, BackupError> {
        let started = Instant::now();
        let result = self.restore_backup_inner(name, started).await;
        BackupMetrics::record_operation("restore", result.is_ok());
        BackupMetrics::observe_duration("restore", started.elapsed().as_secs_f64());
        result
    }

    async fn restore_backup_inner(
        &self,
        name: &str,
        started: Instant,
    ) -> Result<RestoreOutcome, BackupError> {
        validate_name(name)?;
        let source = self.backup_path(name);
        let source_size = self
            .storage
            .size_of(&source)
            .await?
            .ok_or_else(|| BackupError::NotFound(name.to_string()))?;
        self.check_integrity(name, &source).await?;

        info!(backup = %name, size = source_size, "Starting backup restoration");

        let live = self.config.database_path.clone();
        let mut phase = RestorePhase::Idle;

        let safety = if self.storage.exists(&live).await {
            phase = self.advance(name, phase, RestorePhase::SafetyCopying);
            let taken_at = Utc::now();
            let (safety_name, safety_path) = self
                .safety_copy_path(name, taken_at)
                .await
                .map_err(|e| BackupError::SafetyCopyFailure(e.to_string()))?;
            let safety_size = self.storage.copy_file(&live, &safety_path).await.map_err(|e| {
                error!(backup = %name, error = %e, "Safety copy failed, live database untouched");
                BackupError::SafetyCopyFailure(e.to_string())
            })?;
            if !self.storage.exists(&safety_path).await {
                error!(backup = %name, "Safety copy missing after copy, live database untouched");
                return Err(BackupError::SafetyCopyFailure(format!(
                    "{} missing after copy",
                    safety_name
                )));
            }
            self.describe_new_snapshot(
                &safety_name,
                &safety_path,
                BackupKind::PreRestore,
                Some(format!("Live database before restoring {}", name)),
                taken_at,
            )
            .await
            .map_err(|e| BackupError::SafetyCopyFailure(e.to_string()))?;
            debug!(backup = %name, safety_copy = %safety_name, bytes = safety_size, "Safety copy taken");
            Some((safety_name, safety_path, safety_size))
        } else {
            warn!(backup = %name, live = %live.display(), "No live database, restoring without safety copy");
            None
        };

        phase = self.advance(name, phase, RestorePhase::Overwriting);
        let overwrite = self.storage.copy_file(&source, &live).await;

        phase = self.advance(name, phase, RestorePhase::Verifying);
        let failure = match overwrite {
            Ok(_) if self.live_matches(source_size).await => None,
            Ok(_) => Some("live database missing or size mismatch after overwrite".to_string()),
            Err(e) => Some(e.to_string()),
        };

        let Some(reason) = failure else {
            phase = self.advance(name, phase, RestorePhase::Committed);
            BackupMetrics::record_restore_outcome(phase);
            BackupMetrics::record_bytes("restore", source_size);

            let safety_copy = match safety {
                Some((safety_name, safety_path, _))
                    if self.config.safety_retention == SafetyCopyRetention::DiscardOnSuccess =>
                {
                    match self.storage.remove_file(&safety_path).await {
                        Ok(()) => {
                            self.remove_sidecar(&safety_name).await;
                            None
                        }
                        Err(e) => {
                            warn!(safety_copy = %safety_name, error = %e, "Failed to discard safety copy");
                            Some(safety_name)
                        }
                    }
                }
                Some((safety_name, _, _)) => Some(safety_name),
                None => None,
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            info!(
                backup = %name,
                restored_bytes = source_size,
                safety_copy = ?safety_copy,
                duration_ms,
                "Backup restoration completed successfully"
            );
            return Ok(RestoreOutcome {
                backup: name.to_string(),
                restored_bytes: source_size,
                safety_copy,
                phase,
                duration_ms,
            });
        };

        error!(backup = %name, reason = %reason, "Restore verification failed, attempting rollback");

        let rolled_back = match safety {
            Some((ref safety_name, ref safety_path, safety_size)) => {
                match self.storage.copy_file(safety_path, &live).await {
                    Ok(_) => self.live_matches(safety_size).await,
                    Err(e) => {
                        error!(safety_copy = %safety_name, error = %e, "Rollback copy failed");
                        false
                    }
                }
            }
            None => false,
        };

        let terminal = if rolled_back {
            RestorePhase::RolledBack
        } else {
            RestorePhase::Unrecoverable
        };
        phase = self.advance(name, phase, terminal);
        BackupMetrics::record_restore_outcome(phase);

        if rolled_back {
            warn!(backup = %name, "Live database rolled back to its pre-restore state");
        } else {
            error!(
                backup = %name,
                safety_copy = ?safety.as_ref().map(|s| &s.0),
                "Live database could not be rolled back; manual recovery required"
            );
        }

        Err(BackupError::RestoreFailure {
            name: name.to_string(),
            rolled_back,
            reason,
        })
    }

    pub async fn stats(&self) -> Result<BackupStats, BackupError> {
        let backups = self.list_backups().await?;
        let database_size_bytes = self.storage.size_of(&self.config.database_path).await?;

        Ok(BackupStats {
            total_backups: backups.len(),
            total_size_bytes: backups.iter().map(|b| b.size).sum(),
            latest_backup_at: backups.iter().map(|b| b.created_at).max(),
            database_size_bytes,
        })
    }

    /// Recompute checksum and size of a snapshot and compare them with its sidecar.
    pub async fn verify_backup(&self, name: &str) -> Result<VerificationResult, BackupError> {
        validate_name(name)?;
        let path = self.backup_path(name);
        if !self.storage.exists(&path).await {
            return Err(BackupError::NotFound(name.to_string()));
        }

        let data = self.storage.read_file(&path).await?;
        let Some(sidecar) = self.read_sidecar(name).await else {
            return Ok(VerificationResult {
                name: name.to_string(),
                is_valid: true,
                has_sidecar: false,
                checksum_match: None,
                size_match: None,
                corruption_errors: Vec::new(),
            });
        };

        let checksum_match = Self::checksum(&data) == sidecar.checksum;
        let size_match = data.len() as u64 == sidecar.size_bytes;
        let mut corruption_errors = Vec::new();
        if !checksum_match {
            corruption_errors.push("Checksum mismatch".to_string());
        }
        if !size_match {
            corruption_errors.push(format!(
                "Size mismatch: expected {} bytes, found {}",
                sidecar.size_bytes,
                data.len()
            ));
        }

        Ok(VerificationResult {
            name: name.to_string(),
            is_valid: checksum_match && size_match,
            has_sidecar: true,
            checksum_match: Some(checksum_match),
            size_match: Some(size_match),
            corruption_errors,
        })
    }

    /// Prune automatic snapshots per the configured policy.
    ///
    /// Manual and pre-restore snapshots are never pruned.
    pub async fn apply_retention_policy(&self) -> Result<CleanupResult, BackupError> {
        let Some(ref policy) = self.config.retention else {
            return Ok(CleanupResult::default());
        };

        let now = Utc::now();
        let max_age = chrono::Duration::days(i64::from(policy.max_age_days));
        let automatic: Vec<BackupRecord> = self
            .list_backups()
            .await?
            .into_iter()
            .filter(|b| b.kind == BackupKind::Automatic)
            .collect();

        let mut result = CleanupResult::default();
        for (index, backup) in automatic.iter().enumerate() {
            let expired = now.signed_duration_since(backup.created_at) > max_age;
            if index < policy.max_backups && !expired {
                result.retained_backups += 1;
                continue;
            }
            match self.delete_backup(&backup.name).await {
                Ok(()) => result.deleted_backups.push(backup.name.clone()),
                Err(e) => {
                    warn!(backup = %backup.name, error = %e, "Retention could not delete backup");
                    result.retained_backups += 1;
                }
            }
        }

        info!(
            deleted = result.deleted_backups.len(),
            retained = result.retained_backups,
            "Retention policy applied"
        );
        Ok(result)
    }
}
