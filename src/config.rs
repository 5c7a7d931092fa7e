//! Configuration for the backup manager and the HTTP server
//!
//! Values come from code (builder-style `with_*` methods) or from the
//! process environment via [`ServerConfig::from_env`].

use crate::backup::naming;
use crate::backup::{RetentionPolicy, SafetyCopyRetention};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable names
pub mod env_keys {
    /// Path of the live database file
    pub const DATABASE_PATH: &str = "BIZOPS_DATABASE_PATH";
    /// Directory holding snapshots
    pub const BACKUP_DIR: &str = "BIZOPS_BACKUP_DIR";
    /// `retain`, `discard_on_success` or `archive`
    pub const SAFETY_RETENTION: &str = "BIZOPS_SAFETY_RETENTION";
    /// Keep at most this many automatic snapshots
    pub const MAX_BACKUPS: &str = "BIZOPS_MAX_BACKUPS";
    /// Prune automatic snapshots older than this many days
    pub const MAX_BACKUP_AGE_DAYS: &str = "BIZOPS_MAX_BACKUP_AGE_DAYS";
    /// Socket address the server listens on
    pub const BIND_ADDR: &str = "BIZOPS_BIND_ADDR";
    /// Comma-separated `key:user:role[+role]` entries
    pub const API_KEYS: &str = "BIZOPS_API_KEYS";
    /// Optional JSON-lines file receiving audit events
    pub const AUDIT_LOG_PATH: &str = "BIZOPS_AUDIT_LOG";
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A variable held a value that could not be parsed
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Offending value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// The assembled configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Backup manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// The live database file
    pub database_path: PathBuf,
    /// Directory holding snapshots and their sidecars
    pub backup_dir: PathBuf,
    /// File name of the fixed pre-restore safety copy inside `backup_dir`
    pub safety_copy_name: String,
    /// What happens to safety copies after a committed restore
    pub safety_retention: SafetyCopyRetention,
    /// Pruning rules for automatic snapshots, disabled when `None`
    pub retention: Option<RetentionPolicy>,
    /// Longest accepted free-text description, in characters
    pub max_description_len: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/app.db"),
            backup_dir: PathBuf::from("data/backups"),
            safety_copy_name: "pre_restore_backup.db".to_string(),
            safety_retention: SafetyCopyRetention::Retain,
            retention: None,
            max_description_len: 500,
        }
    }
}

impl BackupConfig {
    /// Configuration for the given live database and backup directory
    pub fn new(database_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            backup_dir: backup_dir.into(),
            ..Self::default()
        }
    }

    /// Set the safety copy file name
    pub fn with_safety_copy_name(mut self, name: impl Into<String>) -> Self {
        self.safety_copy_name = name.into();
        self
    }

    /// Set the safety copy retention choice
    pub fn with_safety_retention(mut self, retention: SafetyCopyRetention) -> Self {
        self.safety_retention = retention;
        self
    }

    /// Enable pruning of automatic snapshots
    pub fn with_retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.retention = Some(policy);
        self
    }

    /// Set the description length limit
    pub fn with_max_description_len(mut self, len: usize) -> Self {
        self.max_description_len = len;
        self
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        naming::validate_name(&self.safety_copy_name)
            .map_err(|e| ConfigError::Invalid(format!("safety copy name: {}", e)))?;
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database path is empty".to_string()));
        }
        if self.database_path.parent() == Some(self.backup_dir.as_path())
            && self.database_path.file_name().and_then(|n| n.to_str()) == Some(self.safety_copy_name.as_str())
        {
            return Err(ConfigError::Invalid(
                "safety copy would overwrite the live database".to_string(),
            ));
        }
        Ok(())
    }

    /// Read from a key lookup, falling back to defaults for absent keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(env_keys::DATABASE_PATH) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(env_keys::BACKUP_DIR) {
            config.backup_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(env_keys::SAFETY_RETENTION) {
            config.safety_retention = raw.parse().map_err(|reason| ConfigError::InvalidValue {
                key: env_keys::SAFETY_RETENTION.to_string(),
                value: raw.clone(),
                reason,
            })?;
        }

        let max_backups = parse_number::<usize, _>(&lookup, env_keys::MAX_BACKUPS)?;
        let max_age = parse_number::<u32, _>(&lookup, env_keys::MAX_BACKUP_AGE_DAYS)?;
        if max_backups.is_some() || max_age.is_some() {
            let mut policy = RetentionPolicy::new();
            if let Some(count) = max_backups {
                policy = policy.max_backups(count);
            }
            if let Some(days) = max_age {
                policy = policy.max_age_days(days);
            }
            config.retention = Some(policy);
        }

        config.validate()?;
        Ok(config)
    }
}

/// An API key and the identity it authenticates as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeySpec {
    /// The raw key presented by clients
    pub key: String,
    /// User the key belongs to
    pub user_id: String,
    /// Roles granted to the key
    pub roles: Vec<String>,
}

impl ApiKeySpec {
    fn parse(entry: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: env_keys::API_KEYS.to_string(),
            value: entry.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = entry.trim().splitn(3, ':');
        let key = parts.next().filter(|k| !k.is_empty()).ok_or_else(|| invalid("missing key"))?;
        let user_id = parts.next().filter(|u| !u.is_empty()).ok_or_else(|| invalid("missing user"))?;
        let roles: Vec<String> = parts
            .next()
            .ok_or_else(|| invalid("missing roles"))?
            .split('+')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        if roles.is_empty() {
            return Err(invalid("at least one role is required"));
        }

        Ok(Self {
            key: key.to_string(),
            user_id: user_id.to_string(),
            roles,
        })
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_addr: SocketAddr,
    /// Backup manager configuration
    pub backup: BackupConfig,
    /// Keys accepted by the API
    pub api_keys: Vec<ApiKeySpec>,
    /// Where audit events are appended, in addition to memory
    pub audit_log_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            backup: BackupConfig::default(),
            api_keys: Vec::new(),
            audit_log_path: None,
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            backup: BackupConfig::from_lookup(&lookup)?,
            ..Self::default()
        };

        if let Some(raw) = lookup(env_keys::BIND_ADDR) {
            config.bind_addr = raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                key: env_keys::BIND_ADDR.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(raw) = lookup(env_keys::API_KEYS) {
            config.api_keys = raw
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(ApiKeySpec::parse)
                .collect::<Result<_, _>>()?;
        }
        config.audit_log_path = lookup(env_keys::AUDIT_LOG_PATH).map(PathBuf::from);

        Ok(config)
    }
}

fn parse_number<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
