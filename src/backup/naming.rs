// Snapshot file naming - generation, validation and parsing
//
// Two schemes exist on disk:
//   backup_<kind>_<YYYY-MM-DDTHH-MM-SS-mmmZ>[-N].<ext>   (generated here)
//   backup-<timestamp>.<ext>                            (legacy, timestamp may be epoch millis)

use super::types::{BackupError, BackupKind};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

/// Extensions recognized as database snapshots
pub const BACKUP_EXTENSIONS: [&str; 3] = ["db", "sqlite", "sql"];

/// Suffix of the sidecar metadata file written beside each snapshot
pub const SIDECAR_SUFFIX: &str = ".meta.json";

lazy_static! {
    static ref STRUCTURED_NAME: Regex = Regex::new(
        r"^backup_(?P<kind>[a-z][a-z-]*)_(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}(?:-\d{1,3})?Z)(?:-(?P<seq>\d+))?\.(?:db|sqlite|sql)$"
    )
    .unwrap();
    static ref LEGACY_NAME: Regex =
        Regex::new(r"^backup-(?P<ts>.+)\.(?:db|sqlite|sql)$").unwrap();
    static ref DASHED_ISO: Regex = Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})T(\d{2})-(\d{2})-(\d{2})(?:-(\d{1,3}))?Z?$"
    )
    .unwrap();
    static ref EPOCH_MILLIS: Regex = Regex::new(r"^\d{10,13}$").unwrap();
}

/// What can be learned about a snapshot from its name alone
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName {
    pub kind: BackupKind,
    pub created_at: Option<DateTime<Utc>>,
    /// Collision suffix; a higher value was written later within the same millisecond
    pub seq: u32,
}

/// True when `name` has a stem and ends in a recognized snapshot extension
pub fn has_backup_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BACKUP_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Reject names that could escape the backup directory or are not snapshots.
pub fn validate_name(name: &str) -> Result<(), BackupError> {
    if name.trim().is_empty() {
        return Err(BackupError::InvalidName("name is required".to_string()));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(BackupError::InvalidName(format!(
            "'{}' contains a path separator or parent reference",
            name
        )));
    }
    // Names end up in HTTP headers
    if name.chars().any(|c| c == '"' || c.is_control()) {
        return Err(BackupError::InvalidName(format!(
            "{:?} contains a quote or control character",
            name
        )));
    }
    if !has_backup_extension(name) {
        return Err(BackupError::InvalidName(format!(
            "'{}' must end in one of .{}",
            name,
            BACKUP_EXTENSIONS.join(", .")
        )));
    }
    Ok(())
}

/// `2024-03-05T14:07:09.123Z` rendered with `:` and `.` replaced by `-`
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

/// Collision suffix of a generated name, 0 when absent or unrecognized
pub fn collision_seq(name: &str) -> u32 {
    parse_name(name).map(|p| p.seq).unwrap_or(0)
}

/// Snapshot filename for `kind` at `ts`; `attempt > 0` appends a collision suffix.
pub fn snapshot_name(kind: BackupKind, ts: DateTime<Utc>, attempt: u32) -> String {
    if attempt == 0 {
        format!("backup_{}_{}.db", kind.tag(), format_timestamp(ts))
    } else {
        format!("backup_{}_{}-{}.db", kind.tag(), format_timestamp(ts), attempt)
    }
}

pub fn sidecar_name(name: &str) -> String {
    format!("{}{}", name, SIDECAR_SUFFIX)
}

/// Parse a snapshot name. Returns `None` for names without a snapshot extension.
pub fn parse_name(name: &str) -> Option<ParsedName> {
    if !has_backup_extension(name) {
        return None;
    }

    if let Some(caps) = STRUCTURED_NAME.captures(name) {
        let kind = match &caps["kind"] {
            "manual" => BackupKind::Manual,
            "pre-restore" => BackupKind::PreRestore,
            _ => BackupKind::Automatic,
        };
        let seq = caps
            .name("seq")
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0);
        return Some(ParsedName {
            kind,
            created_at: parse_timestamp(&caps["ts"]),
            seq,
        });
    }

    let created_at = LEGACY_NAME
        .captures(name)
        .and_then(|caps| parse_timestamp(&caps["ts"]));

    Some(ParsedName {
        kind: infer_kind(name),
        created_at,
        seq: 0,
    })
}

fn infer_kind(name: &str) -> BackupKind {
    let lower = name.to_ascii_lowercase();
    if lower.contains("pre-restore") || lower.contains("pre_restore") {
        BackupKind::PreRestore
    } else if lower.contains("manual") {
        BackupKind::Manual
    } else {
        BackupKind::Automatic
    }
}

/// Accepts the dashed ISO form (with or without millis/`Z`) or epoch seconds/millis.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Some(caps) = DASHED_ISO.captures(raw) {
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
        let millis = match caps.get(7) {
            // "-5" is 500ms, "-05" is 50ms
            Some(m) => {
                let digits = m.as_str();
                digits.parse::<u32>().ok()? * 10u32.pow(3 - digits.len() as u32)
            }
            None => 0,
        };
        let naive = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?
            .and_hms_milli_opt(field(4)?, field(5)?, field(6)?, millis)?;
        return Some(Utc.from_utc_datetime(&naive));
    }

    if EPOCH_MILLIS.is_match(raw) {
        let value = raw.parse::<i64>().ok()?;
        return if raw.len() == 13 {
            Utc.timestamp_millis_opt(value).single()
        } else {
            Utc.timestamp_opt(value, 0).single()
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_generated_name_round_trips_through_parser() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
            + chrono::Duration::milliseconds(123);
        let name = snapshot_name(BackupKind::Manual, ts, 0);
        assert_eq!(name, "backup_manual_2024-03-05T14-07-09-123Z.db");

        let parsed = parse_name(&name).expect("recognized");
        assert_eq!(parsed.kind, BackupKind::Manual);
        assert_eq!(parsed.created_at, Some(ts));
    }

    #[test]
    fn test_collision_suffix_is_not_read_as_millis() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let name = snapshot_name(BackupKind::Automatic, ts, 2);
        assert_eq!(name, "backup_automatic_2024-03-05T14-07-09-000Z-2.db");

        let parsed = parse_name(&name).unwrap();
        assert_eq!(parsed.kind, BackupKind::Automatic);
        assert_eq!(parsed.created_at.unwrap().nanosecond(), 0);
        assert_eq!(parsed.seq, 2);
        assert_eq!(collision_seq(&snapshot_name(BackupKind::Automatic, ts, 0)), 0);
        assert_eq!(collision_seq("backup-2023-11-30T08-00-00Z.db"), 0);
    }

    #[test]
    fn test_legacy_names() {
        let parsed = parse_name("backup-2023-11-30T08-00-00-5Z.sqlite").unwrap();
        assert_eq!(parsed.kind, BackupKind::Automatic);
        assert_eq!(
            parsed.created_at,
            Some(Utc.with_ymd_and_hms(2023, 11, 30, 8, 0, 0).unwrap() + chrono::Duration::milliseconds(500))
        );

        let millis = parse_name("backup-1700000000000.db").unwrap();
        assert_eq!(millis.created_at.unwrap().timestamp(), 1_700_000_000);

        let manual = parse_name("backup-manual-export.sql").unwrap();
        assert_eq!(manual.kind, BackupKind::Manual);
        assert_eq!(manual.created_at, None);
    }

    #[test]
    fn test_unrecognized_extension_is_ignored() {
        assert!(parse_name("backup_manual_2024-03-05T14-07-09-123Z.db.meta.json").is_none());
        assert!(parse_name("notes.txt").is_none());
        assert_eq!(
            parse_name("pre_restore_backup.db").unwrap().kind,
            BackupKind::PreRestore
        );
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("backup_manual_2024-03-05T14-07-09-123Z.db").is_ok());
        assert!(validate_name("legacy.SQLITE").is_ok());

        for bad in ["", "   ", "../app.db", "a/b.db", "a\\b.db", "..db", "x.txt", ".db", "nul\0.db", "a\".db", "tab\t.db"] {
            assert!(
                matches!(validate_name(bad), Err(BackupError::InvalidName(_))),
                "expected '{}' to be rejected",
                bad.escape_debug()
            );
        }
    }
}
