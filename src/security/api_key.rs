//! API key authentication
//!
//! Keys are stored only as SHA-256 digests. Roles attached to a key are
//! resolved to permissions through the [`AccessPolicy`] on every request, so
//! a policy change applies to keys that are already registered.

use super::audit::{AuditAction, AuditLogger};
use super::auth::{AccessPolicy, AuthContext, AuthResult, Authenticator, Credentials};
use super::AuthError;
use crate::config::ApiKeySpec;
use crate::metrics::BackupMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Authenticates callers by a shared-secret API key
pub struct ApiKeyAuthenticator {
    /// Registered keys by digest
    keys: Arc<DashMap<String, ApiKeyMetadata>>,
    policy: AccessPolicy,
    audit_logger: Option<Arc<AuditLogger>>,
}

/// Identity a registered key authenticates as
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyMetadata {
    /// Owner of the key
    pub user_id: String,

    /// Roles resolved through the access policy
    pub roles: Vec<String>,

    /// Registration time
    pub registered_at: DateTime<Utc>,

    /// Key is rejected after this instant
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKeyAuthenticator {
    /// Authenticator using the default admin/operator/viewer policy
    pub fn new() -> Self {
        Self::with_policy(AccessPolicy::default())
    }

    /// Authenticator that resolves roles through `policy`
    pub fn with_policy(policy: AccessPolicy) -> Self {
        Self {
            keys: Arc::new(DashMap::new()),
            policy,
            audit_logger: None,
        }
    }

    /// Record accepted and rejected keys in `logger`
    pub fn set_audit_logger(&mut self, logger: Arc<AuditLogger>) {
        self.audit_logger = Some(logger);
    }

    /// Register `api_key` for `user_id`; returns the stored digest.
    ///
    /// Registering the same key again replaces its identity.
    pub fn register_key(
        &self,
        api_key: &str,
        user_id: impl Into<String>,
        roles: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> AuthResult<String> {
        if api_key.trim().is_empty() {
            return Err(AuthError::Registration("API key must not be empty".to_string()));
        }

        let digest = Self::digest(api_key);
        let metadata = ApiKeyMetadata {
            user_id: user_id.into(),
            roles,
            registered_at: Utc::now(),
            expires_at,
        };
        debug!(user = %metadata.user_id, roles = ?metadata.roles, "Registered API key");
        self.keys.insert(digest.clone(), metadata);

        Ok(digest)
    }

    /// Register every key from configuration
    pub fn register_specs(&self, specs: &[ApiKeySpec]) -> AuthResult<()> {
        specs.iter().try_for_each(|spec| {
            self.register_key(&spec.key, spec.user_id.clone(), spec.roles.clone(), None)
                .map(|_| ())
        })
    }

    /// Remove a key; returns whether it was registered
    pub fn revoke_key(&self, api_key: &str) -> bool {
        self.keys.remove(&Self::digest(api_key)).is_some()
    }

    /// Number of registered keys
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn digest(api_key: &str) -> String {
        format!("{:x}", Sha256::digest(api_key.as_bytes()))
    }

    async fn reject(&self, credentials: &Credentials, user_id: &str, error: AuthError) -> AuthError {
        BackupMetrics::record_auth_attempt(credentials.method(), false);
        if let Some(ref logger) = self.audit_logger {
            let details = HashMap::from([
                ("method".to_string(), credentials.method().to_string()),
                ("reason".to_string(), error.to_string()),
            ]);
            logger
                .record(AuditAction::AuthenticationFailed, user_id, None, details)
                .await;
        }
        error
    }
}

impl Default for ApiKeyAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> AuthResult<AuthContext> {
        // Clone out of the map so no shard lock is held across awaits
        let metadata = self
            .keys
            .get(&Self::digest(credentials.secret()))
            .map(|entry| entry.value().clone());

        let Some(metadata) = metadata else {
            warn!(method = credentials.method(), "Rejected unknown API key");
            return Err(self
                .reject(credentials, "anonymous", AuthError::InvalidCredentials)
                .await);
        };

        if matches!(metadata.expires_at, Some(expires_at) if Utc::now() > expires_at) {
            warn!(user = %metadata.user_id, "Rejected expired API key");
            return Err(self
                .reject(credentials, &metadata.user_id, AuthError::TokenExpired)
                .await);
        }

        let mut context = AuthContext::new(metadata.user_id.clone(), metadata.roles.clone())
            .with_permissions(self.policy.permissions_for(&metadata.roles));
        if let Some(expires_at) = metadata.expires_at {
            context.expires_at = expires_at;
        }

        BackupMetrics::record_auth_attempt(credentials.method(), true);
        if let Some(ref logger) = self.audit_logger {
            logger
                .record(
                    AuditAction::AuthenticationSucceeded,
                    metadata.user_id.as_str(),
                    None,
                    HashMap::from([("method".to_string(), credentials.method().to_string())]),
                )
                .await;
        }

        Ok(context)
    }
}
