//! # BizOps Backup Service
//!
//! Backup lifecycle management for the primary database file of a
//! business-management application (clients, projects, proposals, tasks,
//! time tracking).
//!
//! ## Overview
//!
//! The live application state lives in a single database file. This crate
//! keeps a directory of point-in-time snapshots of that file and mediates
//! every transition of the live file between snapshots: creating, listing,
//! downloading, deleting and restoring them, with a safety copy taken before
//! any restore overwrites the live file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bizops_backup::backup::{BackupKind, BackupManager};
//! use bizops_backup::config::BackupConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::new("data/app.db", "data/backups");
//! let manager = BackupManager::new(config);
//!
//! let record = manager
//!     .create_backup(BackupKind::Manual, Some("before quarterly import"))
//!     .await?;
//! manager.restore_backup(&record.name).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`backup`]: snapshot naming, storage and the lifecycle manager
//! - [`config`]: configuration from code or the environment
//! - [`security`]: API key authentication, role policy and audit log
//! - [`metrics`]: Prometheus metrics for backup operations
//! - [`http`]: axum routes exposing the lifecycle operations

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for service-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the backup service
#[derive(Error, Debug)]
pub enum Error {
    /// Backup lifecycle error
    #[error("Backup error: {0}")]
    Backup(#[from] backup::BackupError),

    /// Authentication or authorization error
    #[error("Auth error: {0}")]
    Auth(#[from] security::AuthError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error outside the backup directory (socket binding, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backup naming, storage and lifecycle management
pub mod backup;

/// Configuration for the manager and the server
pub mod config;

/// Security (authentication, authorization and audit)
pub mod security;

/// Prometheus metrics
pub mod metrics;

/// HTTP request handlers and router
pub mod http;
