// Backup System Types - records, outcomes and errors

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What triggered a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Triggered by an operator
    Manual,
    /// Triggered by the hosting environment (cron, deploy hooks)
    Automatic,
    /// Taken by the manager right before a restore overwrote the live database
    PreRestore,
}

impl BackupKind {
    /// Tag embedded in generated filenames
    pub fn tag(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Automatic => "automatic",
            BackupKind::PreRestore => "pre-restore",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for BackupKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(BackupKind::Manual),
            "automatic" | "auto" => Ok(BackupKind::Automatic),
            "pre-restore" | "pre_restore" => Ok(BackupKind::PreRestore),
            other => Err(BackupError::InvalidInput(format!("unknown backup type '{}'", other))),
        }
    }
}

/// A snapshot as seen in the backup directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: BackupKind,
    pub description: Option<String>,
    pub checksum: Option<String>,
}

/// Metadata written next to each snapshot as `<name>.meta.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSidecar {
    pub kind: BackupKind,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// SHA-256 of the snapshot bytes, lowercase hex
    pub checksum: String,
    /// File name of the live database the snapshot was taken from
    pub source: String,
}

/// Raw snapshot bytes for binary transfer
#[derive(Debug, Clone)]
pub struct DownloadPayload {
    pub name: String,
    pub data: Bytes,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size_bytes: u64,
    pub latest_backup_at: Option<DateTime<Utc>>,
    /// `None` when no live database file exists
    pub database_size_bytes: Option<u64>,
}

/// Phases a single restore moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Idle,
    SafetyCopying,
    Overwriting,
    Verifying,
    Committed,
    RolledBack,
    Unrecoverable,
}

impl RestorePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RestorePhase::Committed | RestorePhase::RolledBack | RestorePhase::Unrecoverable
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub backup: String,
    pub restored_bytes: u64,
    /// Name of the pre-restore safety copy still on disk, if any
    pub safety_copy: Option<String>,
    pub phase: RestorePhase,
    pub duration_ms: u64,
}

/// What happens to the pre-restore safety copy after a committed restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCopyRetention {
    /// Keep one fixed-name safety copy, overwritten by the next restore
    Retain,
    /// Remove the safety copy once the restore is verified
    DiscardOnSuccess,
    /// Keep every safety copy under its own timestamped name
    Archive,
}

impl Default for SafetyCopyRetention {
    fn default() -> Self {
        SafetyCopyRetention::Retain
    }
}

impl FromStr for SafetyCopyRetention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "retain" | "keep" => Ok(SafetyCopyRetention::Retain),
            "discard_on_success" | "discard" => Ok(SafetyCopyRetention::DiscardOnSuccess),
            "archive" => Ok(SafetyCopyRetention::Archive),
            other => Err(format!("unknown safety copy retention '{}'", other)),
        }
    }
}

/// Pruning rules for automatic snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_backups: usize,
    pub max_age_days: u32,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self {
            max_backups: 10,
            max_age_days: 30,
        }
    }

    pub fn max_backups(mut self, count: usize) -> Self {
        self.max_backups = count;
        self
    }

    pub fn max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = days;
        self
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupResult {
    pub deleted_backups: Vec<String>,
    pub retained_backups: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub name: String,
    pub is_valid: bool,
    pub has_sidecar: bool,
    /// `None` when there is no sidecar to compare against
    pub checksum_match: Option<bool>,
    pub size_match: Option<bool>,
    pub corruption_errors: Vec<String>,
}

/// Coarse classification used to pick a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Integrity,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Invalid backup name: {0}")]
    InvalidName(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Backup write failed: {0}")]
    WriteFailure(String),
    #[error("Backup delete failed: {0}")]
    DeleteFailure(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Pre-restore safety copy failed: {0}")]
    SafetyCopyFailure(String),
    #[error("Restore of {name} failed (rolled_back={rolled_back}): {reason}")]
    RestoreFailure {
        name: String,
        rolled_back: bool,
        reason: String,
    },
    #[error("Backup {0} failed integrity check")]
    Corrupted(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackupError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BackupError::InvalidName(_) | BackupError::InvalidInput(_) => ErrorClass::Validation,
            BackupError::NotFound(_) => ErrorClass::NotFound,
            BackupError::Corrupted(_) => ErrorClass::Integrity,
            BackupError::WriteFailure(_)
            | BackupError::DeleteFailure(_)
            | BackupError::Io(_)
            | BackupError::SafetyCopyFailure(_)
            | BackupError::RestoreFailure { .. }
            | BackupError::Serialization(_) => ErrorClass::Io,
        }
    }

    /// Stable machine-readable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::InvalidName(_) => "invalid_name",
            BackupError::InvalidInput(_) => "invalid_input",
            BackupError::NotFound(_) => "not_found",
            BackupError::WriteFailure(_) => "write_failure",
            BackupError::DeleteFailure(_) => "delete_failure",
            BackupError::Io(_) => "io_error",
            BackupError::SafetyCopyFailure(_) => "safety_copy_failure",
            BackupError::RestoreFailure { .. } => "restore_failure",
            BackupError::Corrupted(_) => "corrupted",
            BackupError::Serialization(_) => "serialization_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_kind_parsing() {
        assert_eq!("manual".parse::<BackupKind>().unwrap(), BackupKind::Manual);
        assert_eq!(" Automatic ".parse::<BackupKind>().unwrap(), BackupKind::Automatic);
        assert_eq!("pre_restore".parse::<BackupKind>().unwrap(), BackupKind::PreRestore);
        assert!(matches!(
            "nightly".parse::<BackupKind>(),
            Err(BackupError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_record_serializes_kind_as_type() {
        let record = BackupRecord {
            name: "backup_manual_2024-01-01T00-00-00-000Z.db".to_string(),
            size: 4,
            created_at: Utc::now(),
            kind: BackupKind::Manual,
            description: None,
            checksum: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "manual");
    }

    #[test]
    fn test_restore_failure_message_reports_rollback() {
        let err = BackupError::RestoreFailure {
            name: "b.db".to_string(),
            rolled_back: true,
            reason: "size mismatch".to_string(),
        };
        assert!(err.to_string().contains("rolled_back=true"));
        assert_eq!(err.class(), ErrorClass::Io);
        assert_eq!(err.kind(), "restore_failure");
    }

    #[test]
    fn test_safety_retention_parsing() {
        assert_eq!(
            "discard-on-success".parse::<SafetyCopyRetention>().unwrap(),
            SafetyCopyRetention::DiscardOnSuccess
        );
        assert_eq!("archive".parse::<SafetyCopyRetention>().unwrap(), SafetyCopyRetention::Archive);
        assert!("sometimes".parse::<SafetyCopyRetention>().is_err());
    }
}
