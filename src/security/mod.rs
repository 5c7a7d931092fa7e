//! Security module for the backup service
//!
//! Provides API key authentication, role-based authorization and the audit
//! trail recorded for every mutating backup operation.

pub mod api_key;
pub mod audit;
pub mod auth;

pub use api_key::{ApiKeyAuthenticator, ApiKeyMetadata};
pub use audit::{AuditAction, AuditEvent, AuditLogger, DEFAULT_AUDIT_CAPACITY};
pub use auth::{AccessPolicy, AuthContext, AuthResult, Authenticator, Credentials, Permission};

use thiserror::Error;

/// Authentication and authorization errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Credentials did not match a known key
    #[error("Invalid credentials provided")]
    InvalidCredentials,

    /// Key or context past its expiry
    #[error("Credentials have expired")]
    TokenExpired,

    /// No credentials were presented
    #[error("Authentication required for this operation")]
    AuthenticationRequired,

    /// Authenticated but lacking the permission
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Key could not be registered
    #[error("Key registration failed: {0}")]
    Registration(String),
}
