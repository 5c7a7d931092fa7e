//! Request handlers for the backup routes
//!
//! Each handler authenticates the caller, checks one permission, runs one
//! manager operation and records an audit event for anything that mutates
//! the backup directory or the live database.

use super::error::ApiError;
use super::AppState;
use crate::backup::{
    BackupError, BackupKind, BackupRecord, BackupStats, CleanupResult, RestoreOutcome,
    VerificationResult,
};
use crate::metrics::BackupMetrics;
use crate::security::{AuditAction, AuthContext, AuthError, Credentials, Permission};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Body of `POST /api/backups`; an empty body creates a manual snapshot
#[derive(Debug, Default, Deserialize)]
pub struct CreateBackupRequest {
    /// `manual` (default) or `automatic`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Free-text note stored in the sidecar
    pub description: Option<String>,
}

/// Body of `GET /api/backups`
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupListResponse {
    /// Snapshots, newest first
    pub backups: Vec<BackupRecord>,
}

/// Body of `DELETE /api/backups/:name`
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Name of the removed snapshot
    pub deleted: String,
}

fn credentials_from(headers: &HeaderMap) -> Option<Credentials> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(Credentials::ApiKey(key.trim().to_string()));
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| Credentials::Bearer(token.trim().to_string()))
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    permission: Permission,
    action: &str,
) -> Result<AuthContext, ApiError> {
    let credentials = credentials_from(headers).ok_or(AuthError::AuthenticationRequired)?;
    let context = state.authenticator.authenticate(&credentials).await?;

    let decision = context.require(&permission);
    BackupMetrics::record_authz_decision(action, decision.is_ok());
    if let Err(e) = decision {
        warn!(user = %context.user_id, action, "Permission denied");
        state
            .audit
            .record(
                AuditAction::PermissionDenied,
                context.user_id.as_str(),
                None,
                HashMap::from([("action".to_string(), action.to_string())]),
            )
            .await;
        return Err(e.into());
    }

    Ok(context)
}

async fn audit(
    state: &AppState,
    action: AuditAction,
    user: &AuthContext,
    backup: Option<&str>,
    details: &[(&str, String)],
) {
    let details = details
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    state
        .audit
        .record(action, user.user_id.as_str(), backup, details)
        .await;
}

/// GET /api/backups
pub async fn list_backups(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BackupListResponse>, ApiError> {
    authorize(&state, &headers, Permission::ViewBackups, "list").await?;
    let backups = state.manager.list_backups().await?;
    Ok(Json(BackupListResponse { backups }))
}

/// POST /api/backups
pub async fn create_backup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<BackupRecord>), ApiError> {
    let user = authorize(&state, &headers, Permission::CreateBackup, "create").await?;

    let request: CreateBackupRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateBackupRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let kind = match request.kind.as_deref() {
        None => BackupKind::Manual,
        Some(raw) => raw.parse::<BackupKind>()?,
    };

    let record = state
        .manager
        .create_backup(kind, request.description.as_deref())
        .await?;

    audit(
        &state,
        AuditAction::BackupCreated,
        &user,
        Some(record.name.as_str()),
        &[("type", kind.to_string())],
    )
    .await;
    info!(user = %user.user_id, backup = %record.name, "Backup created via API");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/backups/stats
pub async fn backup_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BackupStats>, ApiError> {
    authorize(&state, &headers, Permission::ViewBackups, "stats").await?;
    Ok(Json(state.manager.stats().await?))
}

/// GET /api/backups/:name
pub async fn download_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authorize(&state, &headers, Permission::DownloadBackup, "download").await?;
    let payload = state.manager.download_backup(&name).await?;

    audit(&state, AuditAction::BackupDownloaded, &user, Some(payload.name.as_str()), &[]).await;

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", payload.name),
        ),
        (header::CONTENT_LENGTH, payload.len.to_string()),
    ];
    Ok((headers, payload.data).into_response())
}

/// DELETE /api/backups/:name
pub async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteResponse>, ApiError> {
    let user = authorize(&state, &headers, Permission::DeleteBackup, "delete").await?;
    state.manager.delete_backup(&name).await?;

    audit(&state, AuditAction::BackupDeleted, &user, Some(name.as_str()), &[]).await;
    Ok(Json(DeleteResponse { deleted: name }))
}

/// POST /api/backups/:name/restore
pub async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RestoreOutcome>, ApiError> {
    let user = authorize(&state, &headers, Permission::RestoreBackup, "restore").await?;

    match state.manager.restore_backup(&name).await {
        Ok(outcome) => {
            let mut details = vec![("bytes", outcome.restored_bytes.to_string())];
            if let Some(ref safety) = outcome.safety_copy {
                details.push(("safety_copy", safety.clone()));
            }
            audit(&state, AuditAction::BackupRestored, &user, Some(name.as_str()), &details).await;
            Ok(Json(outcome))
        }
        Err(e) => {
            // Failures that reached the live database are audited too
            if let BackupError::RestoreFailure { rolled_back, .. } = &e {
                audit(
                    &state,
                    AuditAction::RestoreFailed,
                    &user,
                    Some(name.as_str()),
                    &[("rolled_back", rolled_back.to_string())],
                )
                .await;
            }
            Err(e.into())
        }
    }
}

/// GET /api/backups/:name/verify
pub async fn verify_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<VerificationResult>, ApiError> {
    authorize(&state, &headers, Permission::ViewBackups, "verify").await?;
    Ok(Json(state.manager.verify_backup(&name).await?))
}

/// POST /api/backups/prune
pub async fn prune_backups(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CleanupResult>, ApiError> {
    let user = authorize(&state, &headers, Permission::DeleteBackup, "prune").await?;
    let result = state.manager.apply_retention_policy().await?;

    if !result.deleted_backups.is_empty() {
        audit(
            &state,
            AuditAction::BackupsPruned,
            &user,
            None,
            &[("deleted", result.deleted_backups.join(","))],
        )
        .await;
    }
    Ok(Json(result))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /metrics
pub async fn metrics() -> Result<String, ApiError> {
    BackupMetrics::export_metrics().map_err(ApiError::Internal)
}
