// Backup and Restore - point-in-time copies of the live database file

pub mod manager;
pub mod naming;
pub mod storage;
pub mod types;

pub use manager::BackupManager;
pub use storage::{BackupStorage, FileBackupStorage, StoredFile};
pub use types::{
    BackupError, BackupKind, BackupRecord, BackupSidecar, BackupStats, CleanupResult,
    DownloadPayload, ErrorClass, RestoreOutcome, RestorePhase, RetentionPolicy,
    SafetyCopyRetention, VerificationResult,
};
