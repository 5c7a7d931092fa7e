//! HTTP surface of the backup service
//!
//! | Method | Path | Permission |
//! |---|---|---|
//! | GET | `/api/backups` | `ViewBackups` |
//! | POST | `/api/backups` | `CreateBackup` |
//! | GET | `/api/backups/stats` | `ViewBackups` |
//! | POST | `/api/backups/prune` | `DeleteBackup` |
//! | GET | `/api/backups/:name` | `DownloadBackup` |
//! | DELETE | `/api/backups/:name` | `DeleteBackup` |
//! | POST | `/api/backups/:name/restore` | `RestoreBackup` |
//! | GET | `/api/backups/:name/verify` | `ViewBackups` |
//! | GET | `/health`, `/metrics` | none |

pub mod error;
pub mod handlers;

pub use error::ApiError;

use crate::backup::BackupManager;
use crate::config::ServerConfig;
use crate::security::{ApiKeyAuthenticator, AuditLogger, Authenticator};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared state handed to every handler
pub struct AppState {
    /// Backup lifecycle manager
    pub manager: Arc<BackupManager>,
    /// Access-control collaborator
    pub authenticator: Arc<dyn Authenticator>,
    /// Audit trail
    pub audit: Arc<AuditLogger>,
}

impl AppState {
    /// Assemble state from its parts
    pub fn new(
        manager: Arc<BackupManager>,
        authenticator: Arc<dyn Authenticator>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            manager,
            authenticator,
            audit,
        }
    }

    /// Build manager, authenticator and audit log from server configuration
    pub fn from_config(config: &ServerConfig) -> crate::Result<Self> {
        config.backup.validate()?;

        let audit = match config.audit_log_path {
            Some(ref path) => AuditLogger::new().with_file_sink(path),
            None => AuditLogger::new(),
        };
        let audit = Arc::new(audit);

        let mut authenticator = ApiKeyAuthenticator::new();
        authenticator.set_audit_logger(audit.clone());
        authenticator.register_specs(&config.api_keys)?;
        if config.api_keys.is_empty() {
            warn!("No API keys configured; every backup route will answer 401");
        }

        Ok(Self::new(
            Arc::new(BackupManager::new(config.backup.clone())),
            Arc::new(authenticator),
            audit,
        ))
    }
}

/// Router with every backup route
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/backups",
            get(handlers::list_backups).post(handlers::create_backup),
        )
        .route("/api/backups/stats", get(handlers::backup_stats))
        .route("/api/backups/prune", post(handlers::prune_backups))
        .route(
            "/api/backups/:name",
            get(handlers::download_backup).delete(handlers::delete_backup),
        )
        .route("/api/backups/:name/restore", post(handlers::restore_backup))
        .route("/api/backups/:name/verify", get(handlers::verify_backup))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}

/// Bind to the configured address and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> crate::Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    let app = router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        addr = %config.bind_addr,
        database = %config.backup.database_path.display(),
        backup_dir = %config.backup.backup_dir.display(),
        "Backup service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Backup service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
