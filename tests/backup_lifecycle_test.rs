// Integration tests for the backup lifecycle against a real filesystem
// Each test gets its own temporary live database and backup directory

use bizops_backup::backup::naming::{format_timestamp, snapshot_name};
use bizops_backup::backup::{
    BackupError, BackupKind, BackupManager, RestorePhase, RetentionPolicy, SafetyCopyRetention,
};
use bizops_backup::config::BackupConfig;
use chrono::{Duration, DurationRound, Utc};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;

struct Fixture {
    _dir: TempDir,
    live: PathBuf,
    backups: PathBuf,
}

impl Fixture {
    async fn new(live_contents: Option<&[u8]>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let live = dir.path().join("crm.db");
        let backups = dir.path().join("backups");
        if let Some(bytes) = live_contents {
            fs::write(&live, bytes).await.expect("write live db");
        }
        Self { _dir: dir, live, backups }
    }

    fn config(&self) -> BackupConfig {
        BackupConfig::new(&self.live, &self.backups)
    }

    fn manager(&self) -> BackupManager {
        BackupManager::new(self.config())
    }

    async fn live_bytes(&self) -> Vec<u8> {
        fs::read(&self.live).await.expect("read live db")
    }

    async fn dir_listing(&self) -> BTreeSet<String> {
        list_dir(&self.backups).await
    }
}

async fn list_dir(dir: &Path) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if let Ok(mut entries) = fs::read_dir(dir).await {
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names
}

#[tokio::test]
async fn test_create_then_list_contains_exactly_one_new_manual_record() {
    let fx = Fixture::new(Some(b"clients+projects")).await;
    let manager = fx.manager();

    manager.create_backup(BackupKind::Automatic, None).await.unwrap();
    let before = manager.list_backups().await.unwrap();

    let created = manager
        .create_backup(BackupKind::Manual, Some("before proposal import"))
        .await
        .expect("create manual backup");

    let after = manager.list_backups().await.unwrap();
    let new_records: Vec<_> = after
        .iter()
        .filter(|r| !before.iter().any(|b| b.name == r.name))
        .collect();

    assert_eq!(new_records.len(), 1);
    assert_eq!(new_records[0].kind, BackupKind::Manual);
    assert_eq!(new_records[0].name, created.name);
    assert_eq!(new_records[0].size, 16);
    assert_eq!(new_records[0].description.as_deref(), Some("before proposal import"));
    // newest first
    assert_eq!(after[0].name, created.name);
}

#[tokio::test]
async fn test_list_on_absent_directory_creates_it() {
    let fx = Fixture::new(Some(b"x")).await;
    assert!(fs::metadata(&fx.backups).await.is_err());

    let records = fx.manager().list_backups().await.unwrap();

    assert!(records.is_empty());
    assert!(fs::metadata(&fx.backups).await.unwrap().is_dir());
}

#[tokio::test]
async fn test_list_on_empty_directory_is_empty() {
    let fx = Fixture::new(Some(b"x")).await;
    fs::create_dir_all(&fx.backups).await.unwrap();
    fs::write(fx.backups.join("README.txt"), b"not a snapshot").await.unwrap();

    assert!(fx.manager().list_backups().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_and_delete_succeed_iff_file_exists() {
    let fx = Fixture::new(Some(b"live-bytes")).await;
    let manager = fx.manager();
    let record = manager.create_backup(BackupKind::Manual, None).await.unwrap();

    let payload = manager.download_backup(&record.name).await.unwrap();
    assert_eq!(payload.data.as_ref(), b"live-bytes");
    assert_eq!(payload.len, 10);

    manager.delete_backup(&record.name).await.unwrap();
    assert!(!fx.dir_listing().await.contains(&record.name));
    // sidecar goes with it
    assert!(fx.dir_listing().await.is_empty());

    assert!(matches!(
        manager.download_backup(&record.name).await,
        Err(BackupError::NotFound(_))
    ));
    assert!(matches!(
        manager.delete_backup(&record.name).await,
        Err(BackupError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_missing_is_not_found_without_mutation() {
    let fx = Fixture::new(Some(b"x")).await;
    let manager = fx.manager();
    manager.create_backup(BackupKind::Manual, None).await.unwrap();
    let before = fx.dir_listing().await;

    let result = manager.delete_backup("backup_manual_1999-01-01T00-00-00-000Z.db").await;

    assert!(matches!(result, Err(BackupError::NotFound(_))));
    assert_eq!(fx.dir_listing().await, before);
}

#[tokio::test]
async fn test_traversal_names_are_rejected_before_touching_the_filesystem() {
    let fx = Fixture::new(Some(b"live")).await;
    let manager = fx.manager();
    let outside = fx.live.parent().unwrap().join("secret.db");
    fs::write(&outside, b"outside the backup dir").await.unwrap();
    fs::create_dir_all(&fx.backups).await.unwrap();

    for name in ["../secret.db", "..\\secret.db", "nested/secret.db", "../crm.db"] {
        assert!(matches!(manager.download_backup(name).await, Err(BackupError::InvalidName(_))));
        assert!(matches!(manager.delete_backup(name).await, Err(BackupError::InvalidName(_))));
        assert!(matches!(manager.restore_backup(name).await, Err(BackupError::InvalidName(_))));
    }

    assert_eq!(fs::read(&outside).await.unwrap(), b"outside the backup dir");
    assert_eq!(fx.live_bytes().await, b"live");
    assert!(fx.dir_listing().await.is_empty());
}

#[tokio::test]
async fn test_restore_of_missing_backup_leaves_live_database_unchanged() {
    let fx = Fixture::new(Some(b"current state")).await;
    let manager = fx.manager();
    fs::create_dir_all(&fx.backups).await.unwrap();

    let result = manager
        .restore_backup("backup_manual_2020-02-02T02-02-02-000Z.db")
        .await;

    assert!(matches!(result, Err(BackupError::NotFound(_))));
    assert_eq!(fx.live_bytes().await, b"current state");
    // no safety copy was taken either
    assert!(fx.dir_listing().await.is_empty());
}

#[tokio::test]
async fn test_restore_scenario_returns_live_to_backup_and_keeps_safety_copy() {
    // live = A, back it up as B1, live becomes C, restore B1
    let fx = Fixture::new(Some(b"A")).await;
    let manager = fx.manager();

    let b1 = manager.create_backup(BackupKind::Manual, None).await.unwrap();
    fs::write(&fx.live, b"C").await.unwrap();

    let outcome = manager.restore_backup(&b1.name).await.expect("restore B1");

    assert_eq!(outcome.phase, RestorePhase::Committed);
    assert_eq!(outcome.restored_bytes, 1);
    assert_eq!(outcome.safety_copy.as_deref(), Some("pre_restore_backup.db"));
    assert_eq!(fx.live_bytes().await, b"A");
    assert_eq!(
        fs::read(fx.backups.join("pre_restore_backup.db")).await.unwrap(),
        b"C"
    );

    let safety = manager
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.name == "pre_restore_backup.db")
        .expect("safety copy listed");
    assert_eq!(safety.kind, BackupKind::PreRestore);
}

#[tokio::test]
async fn test_restoring_the_safety_copy_itself_archives_the_current_live_state() {
    let fx = Fixture::new(Some(b"A")).await;
    let manager = fx.manager();
    let b1 = manager.create_backup(BackupKind::Manual, None).await.unwrap();
    fs::write(&fx.live, b"C").await.unwrap();
    manager.restore_backup(&b1.name).await.unwrap();

    // undo the restore from the retained safety copy
    let outcome = manager.restore_backup("pre_restore_backup.db").await.unwrap();

    assert_eq!(fx.live_bytes().await, b"C");
    let archived = outcome.safety_copy.expect("archived safety copy");
    assert!(archived.starts_with("backup_pre-restore_"));
    assert_eq!(fs::read(fx.backups.join(&archived)).await.unwrap(), b"A");
}

#[tokio::test]
async fn test_restore_without_live_database_creates_it() {
    let fx = Fixture::new(Some(b"snapshot")).await;
    let manager = fx.manager();
    let record = manager.create_backup(BackupKind::Manual, None).await.unwrap();
    fs::remove_file(&fx.live).await.unwrap();

    let outcome = manager.restore_backup(&record.name).await.unwrap();

    assert_eq!(outcome.safety_copy, None);
    assert_eq!(fx.live_bytes().await, b"snapshot");
}

#[tokio::test]
async fn test_discard_on_success_removes_safety_copy() {
    let fx = Fixture::new(Some(b"A")).await;
    let manager = BackupManager::new(
        fx.config()
            .with_safety_retention(SafetyCopyRetention::DiscardOnSuccess),
    );
    let b1 = manager.create_backup(BackupKind::Manual, None).await.unwrap();
    fs::write(&fx.live, b"C").await.unwrap();

    let outcome = manager.restore_backup(&b1.name).await.unwrap();

    assert_eq!(outcome.safety_copy, None);
    assert_eq!(fx.live_bytes().await, b"A");
    let names = fx.dir_listing().await;
    assert!(!names.contains("pre_restore_backup.db"));
    assert!(!names.contains("pre_restore_backup.db.meta.json"));
}

#[tokio::test]
async fn test_archive_retention_keeps_every_safety_copy() {
    let fx = Fixture::new(Some(b"A")).await;
    let manager = BackupManager::new(fx.config().with_safety_retention(SafetyCopyRetention::Archive));
    let b1 = manager.create_backup(BackupKind::Manual, None).await.unwrap();

    fs::write(&fx.live, b"C").await.unwrap();
    let first = manager.restore_backup(&b1.name).await.unwrap();
    fs::write(&fx.live, b"D").await.unwrap();
    let second = manager.restore_backup(&b1.name).await.unwrap();

    let first = first.safety_copy.unwrap();
    let second = second.safety_copy.unwrap();
    assert_ne!(first, second);

    // the archived name carries the same instant as its sidecar
    for archived in [&first, &second] {
        let record = manager
            .list_backups()
            .await
            .unwrap()
            .into_iter()
            .find(|r| &r.name == archived)
            .unwrap();
        assert!(archived.contains(&format_timestamp(record.created_at)));
    }
    assert_eq!(fs::read(fx.backups.join(&first)).await.unwrap(), b"C");
    assert_eq!(fs::read(fx.backups.join(&second)).await.unwrap(), b"D");

    let pre_restore = manager
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.kind == BackupKind::PreRestore)
        .count();
    assert_eq!(pre_restore, 2);
}

#[tokio::test]
async fn test_legacy_files_without_sidecars_are_listed_newest_first() {
    let fx = Fixture::new(Some(b"x")).await;
    fs::create_dir_all(&fx.backups).await.unwrap();
    fs::write(fx.backups.join("backup-2023-05-01T10-00-00-000Z.db"), b"old").await.unwrap();
    fs::write(fx.backups.join("backup_manual_2024-01-15T09-30-00-250Z.sqlite"), b"newer").await.unwrap();
    fs::write(fx.backups.join("backup-1600000000000.sql"), b"oldest").await.unwrap();
    fs::write(fx.backups.join("notes.md"), b"ignored").await.unwrap();

    let records = fx.manager().list_backups().await.unwrap();
    let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();

    assert_eq!(
        names,
        vec![
            "backup_manual_2024-01-15T09-30-00-250Z.sqlite",
            "backup-2023-05-01T10-00-00-000Z.db",
            "backup-1600000000000.sql",
        ]
    );
    assert_eq!(records[0].kind, BackupKind::Manual);
    assert_eq!(records[1].kind, BackupKind::Automatic);
    assert!(records.iter().all(|r| r.checksum.is_none()));
}

#[tokio::test]
async fn test_stats_aggregate_backups_and_live_size() {
    let fx = Fixture::new(Some(b"12345")).await;
    let manager = fx.manager();
    manager.create_backup(BackupKind::Manual, None).await.unwrap();
    let latest = manager.create_backup(BackupKind::Automatic, None).await.unwrap();
    fs::write(&fx.live, b"1234567").await.unwrap();

    let stats = manager.stats().await.unwrap();

    assert_eq!(stats.total_backups, 2);
    assert_eq!(stats.total_size_bytes, 10);
    assert_eq!(stats.latest_backup_at, Some(latest.created_at));
    assert_eq!(stats.database_size_bytes, Some(7));
}

#[tokio::test]
async fn test_retention_prunes_only_automatic_backups() {
    let fx = Fixture::new(Some(b"x")).await;
    let manager = BackupManager::new(
        fx.config()
            .with_retention_policy(RetentionPolicy::new().max_backups(2).max_age_days(30)),
    );

    let manual = manager.create_backup(BackupKind::Manual, None).await.unwrap();
    let mut automatic = Vec::new();
    for _ in 0..3 {
        automatic.push(manager.create_backup(BackupKind::Automatic, None).await.unwrap());
    }
    fs::write(fx.backups.join("backup-2001-01-01T00-00-00Z.db"), b"ancient").await.unwrap();

    let result = manager.apply_retention_policy().await.unwrap();

    assert_eq!(result.retained_backups, 2);
    assert_eq!(
        result.deleted_backups,
        vec![automatic[0].name.clone(), "backup-2001-01-01T00-00-00Z.db".to_string()]
    );

    let remaining: BTreeSet<_> = manager
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert!(remaining.contains(&manual.name));
    assert!(remaining.contains(&automatic[1].name));
    assert!(remaining.contains(&automatic[2].name));
    assert_eq!(remaining.len(), 3);
}

#[tokio::test]
async fn test_retention_without_policy_is_a_no_op() {
    let fx = Fixture::new(Some(b"x")).await;
    let manager = fx.manager();
    manager.create_backup(BackupKind::Automatic, None).await.unwrap();

    let result = manager.apply_retention_policy().await.unwrap();

    assert!(result.deleted_backups.is_empty());
    assert_eq!(manager.list_backups().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_millisecond_snapshots_without_sidecars_keep_write_order() {
    let fx = Fixture::new(Some(b"x")).await;
    fs::create_dir_all(&fx.backups).await.unwrap();
    let ts = Utc::now().duration_trunc(Duration::milliseconds(1)).unwrap();
    let first = snapshot_name(BackupKind::Automatic, ts, 0);
    let second = snapshot_name(BackupKind::Automatic, ts, 1);
    let third = snapshot_name(BackupKind::Automatic, ts, 2);
    for name in [&second, &first, &third] {
        fs::write(fx.backups.join(name), name.as_bytes()).await.unwrap();
    }

    let manager = BackupManager::new(
        fx.config()
            .with_retention_policy(RetentionPolicy::new().max_backups(1).max_age_days(30)),
    );
    let names: Vec<_> = manager
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec![third.clone(), second.clone(), first.clone()]);

    let result = manager.apply_retention_policy().await.unwrap();

    assert_eq!(result.deleted_backups, vec![second, first]);
    assert_eq!(result.retained_backups, 1);
    assert!(fs::metadata(fx.backups.join(&third)).await.is_ok());
}

#[tokio::test]
async fn test_retention_deletes_expired_backups_within_the_count_limit() {
    let fx = Fixture::new(Some(b"x")).await;
    let manager = BackupManager::new(
        fx.config()
            .with_retention_policy(RetentionPolicy::new().max_backups(10).max_age_days(30)),
    );
    let fresh = manager.create_backup(BackupKind::Automatic, None).await.unwrap();
    fs::write(fx.backups.join("backup-2001-01-01T00-00-00Z.db"), b"ancient").await.unwrap();

    let result = manager.apply_retention_policy().await.unwrap();

    assert_eq!(result.deleted_backups, vec!["backup-2001-01-01T00-00-00Z.db".to_string()]);
    assert_eq!(result.retained_backups, 1);
    let remaining: Vec<_> = manager
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(remaining, vec![fresh.name]);
}
