//! Audit trail for backup operations and access decisions
//!
//! Every mutating backup operation and every rejected caller produces one
//! [`AuditEvent`]. Events are kept in a bounded in-memory log and, when a
//! sink is configured, appended to a JSON-lines file.

use crate::metrics::BackupMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Events kept in memory before the oldest are dropped
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// What an audit event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A snapshot was written
    BackupCreated,
    /// Snapshot bytes were served to a caller
    BackupDownloaded,
    /// A snapshot was removed
    BackupDeleted,
    /// The live database was replaced by a snapshot
    BackupRestored,
    /// A restore reached the live database and failed
    RestoreFailed,
    /// Retention removed automatic snapshots
    BackupsPruned,
    /// An authenticated caller lacked a permission
    PermissionDenied,
    /// An API key was accepted
    AuthenticationSucceeded,
    /// An API key was rejected
    AuthenticationFailed,
}

impl AuditAction {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BackupCreated => "backup_created",
            AuditAction::BackupDownloaded => "backup_downloaded",
            AuditAction::BackupDeleted => "backup_deleted",
            AuditAction::BackupRestored => "backup_restored",
            AuditAction::RestoreFailed => "restore_failed",
            AuditAction::BackupsPruned => "backups_pruned",
            AuditAction::PermissionDenied => "permission_denied",
            AuditAction::AuthenticationSucceeded => "authentication_succeeded",
            AuditAction::AuthenticationFailed => "authentication_failed",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id
    pub id: Uuid,

    /// What happened
    pub action: AuditAction,

    /// Caller the event is attributed to
    pub user_id: String,

    /// Snapshot the event concerns, if any
    pub backup: Option<String>,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Action-specific details (safety copy name, rollback flag, ...)
    pub details: HashMap<String, String>,
}

/// Bounded audit log shared between handlers and the authenticator
#[derive(Clone)]
pub struct AuditLogger {
    events: Arc<RwLock<VecDeque<AuditEvent>>>,
    capacity: usize,
    sink: Option<PathBuf>,
}

impl AuditLogger {
    /// In-memory log holding up to [`DEFAULT_AUDIT_CAPACITY`] events
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// In-memory log holding up to `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
            sink: None,
        }
    }

    /// Also append each event as one JSON line to `path`
    pub fn with_file_sink(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = Some(path.into());
        self
    }

    /// Record `action` by `user_id`, optionally against one snapshot
    pub async fn record(
        &self,
        action: AuditAction,
        user_id: impl Into<String>,
        backup: Option<&str>,
        details: HashMap<String, String>,
    ) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            action,
            user_id: user_id.into(),
            backup: backup.map(str::to_string),
            timestamp: Utc::now(),
            details,
        };

        info!(
            action = %event.action,
            user = %event.user_id,
            backup = ?event.backup,
            "Audit event"
        );
        BackupMetrics::record_audit_log(action.as_str());

        if let Some(ref path) = self.sink {
            if let Err(e) = append_line(path, &event).await {
                warn!(path = %path.display(), error = %e, "Failed to append audit event to file");
            }
        }

        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// All retained events, oldest first
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    /// Events attributed to `user_id`
    pub async fn events_for_user(&self, user_id: &str) -> Vec<AuditEvent> {
        self.filtered(|e| e.user_id == user_id).await
    }

    /// Events with the given action
    pub async fn events_of(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.filtered(|e| e.action == action).await
    }

    /// Events concerning snapshot `name`
    pub async fn events_for_backup(&self, name: &str) -> Vec<AuditEvent> {
        self.filtered(|e| e.backup.as_deref() == Some(name)).await
    }

    async fn filtered<F>(&self, keep: F) -> Vec<AuditEvent>
    where
        F: Fn(&AuditEvent) -> bool,
    {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| keep(e))
            .cloned()
            .collect()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

async fn append_line(path: &Path, event: &AuditEvent) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(&line).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_query() {
        let logger = AuditLogger::new();

        logger
            .record(AuditAction::BackupCreated, "ana", Some("b.db"), HashMap::new())
            .await;
        logger
            .record(AuditAction::PermissionDenied, "vera", None, HashMap::new())
            .await;

        assert_eq!(logger.events().await.len(), 2);
        assert_eq!(logger.events_for_user("ana").await.len(), 1);
        assert_eq!(logger.events_for_backup("b.db").await[0].action, AuditAction::BackupCreated);
        assert_eq!(logger.events_of(AuditAction::PermissionDenied).await[0].user_id, "vera");
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let logger = AuditLogger::with_capacity(2);
        for name in ["a.db", "b.db", "c.db"] {
            logger
                .record(AuditAction::BackupDeleted, "ana", Some(name), HashMap::new())
                .await;
        }

        let backups: Vec<_> = logger
            .events()
            .await
            .into_iter()
            .filter_map(|e| e.backup)
            .collect();
        assert_eq!(backups, vec!["b.db", "c.db"]);
    }

    #[tokio::test]
    async fn test_file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new().with_file_sink(&path);

        logger
            .record(AuditAction::BackupDeleted, "ana", Some("x.db"), HashMap::new())
            .await;
        logger
            .record(
                AuditAction::BackupRestored,
                "ana",
                Some("y.db"),
                HashMap::from([("safety_copy".to_string(), "pre_restore_backup.db".to_string())]),
            )
            .await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let actions: Vec<AuditAction> = contents
            .lines()
            .map(|line| serde_json::from_str::<AuditEvent>(line).unwrap().action)
            .collect();
        assert_eq!(actions, vec![AuditAction::BackupDeleted, AuditAction::BackupRestored]);
        assert!(contents.contains("\"action\":\"backup_restored\""));
    }
}
