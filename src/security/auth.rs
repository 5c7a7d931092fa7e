//! Core authentication traits and types

use super::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Core authentication trait implemented by all authenticators
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate using provided credentials
    async fn authenticate(&self, credentials: &Credentials) -> AuthResult<AuthContext>;
}

/// Authentication context containing validated user information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Unique user identifier
    pub user_id: String,

    /// User roles (e.g., "admin", "operator", "viewer")
    pub roles: Vec<String>,

    /// Permissions granted through the roles
    pub permissions: HashSet<Permission>,

    /// When this context expires
    pub expires_at: DateTime<Utc>,

    /// When this context was issued
    pub issued_at: DateTime<Utc>,
}

impl AuthContext {
    /// Create a new authentication context
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            roles,
            permissions: HashSet::new(),
            expires_at: now + chrono::Duration::hours(24),
            issued_at: now,
        }
    }

    /// Attach the permissions granted to this context
    pub fn with_permissions(mut self, permissions: HashSet<Permission>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Check if context has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check if context has a specific permission
    pub fn has_permission(&self, permission: &Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Fail with [`AuthError::PermissionDenied`] unless the permission is held
    pub fn require(&self, permission: &Permission) -> AuthResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied(format!(
                "user {} lacks {:?}",
                self.user_id, permission
            )))
        }
    }

    /// Check if context is expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Credentials presented with a request
#[derive(Debug, Clone)]
pub enum Credentials {
    /// `x-api-key` header
    ApiKey(String),

    /// `Authorization: Bearer <key>` header
    Bearer(String),
}

impl Credentials {
    /// The raw secret regardless of transport
    pub fn secret(&self) -> &str {
        match self {
            Credentials::ApiKey(key) | Credentials::Bearer(key) => key,
        }
    }

    /// Label used for metrics
    pub fn method(&self) -> &'static str {
        match self {
            Credentials::ApiKey(_) => "api_key",
            Credentials::Bearer(_) => "bearer",
        }
    }
}

/// Granular permission enum
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// List snapshots, read stats, verify snapshots
    ViewBackups,

    /// Create snapshots
    CreateBackup,

    /// Download snapshot bytes
    DownloadBackup,

    /// Delete snapshots and apply retention
    DeleteBackup,

    /// Restore a snapshot over the live database
    RestoreBackup,

    /// View audit logs
    ViewAuditLogs,

    /// Custom permission
    Custom(String),
}

/// Role to permission mapping
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    roles: HashMap<String, HashSet<Permission>>,
}

impl AccessPolicy {
    /// A policy with no roles
    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
        }
    }

    /// Grant `permissions` to `role`, adding to what it already has
    pub fn grant(mut self, role: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.roles.entry(role.into()).or_default().extend(permissions);
        self
    }

    /// Union of the permissions of every role in `roles`; unknown roles grant nothing
    pub fn permissions_for(&self, roles: &[String]) -> HashSet<Permission> {
        roles
            .iter()
            .filter_map(|role| self.roles.get(role))
            .flat_map(|perms| perms.iter().cloned())
            .collect()
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        use Permission::*;
        Self::empty()
            .grant(
                "admin",
                [ViewBackups, CreateBackup, DownloadBackup, DeleteBackup, RestoreBackup, ViewAuditLogs],
            )
            .grant("operator", [ViewBackups, CreateBackup, DownloadBackup])
            .grant("viewer", [ViewBackups])
    }
}
