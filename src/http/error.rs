//! Translation of backup and auth errors into structured responses

use crate::backup::{BackupError, ErrorClass};
use crate::security::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

/// Error returned by every handler
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Backup lifecycle failure
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Authentication or authorization failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Request body did not fit the expected shape
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Backup(e) => match e.class() {
                ErrorClass::Validation => StatusCode::BAD_REQUEST,
                ErrorClass::NotFound => StatusCode::NOT_FOUND,
                ErrorClass::Integrity => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorClass::Io => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Auth(e) => match e {
                AuthError::InvalidCredentials
                | AuthError::TokenExpired
                | AuthError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
                AuthError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                AuthError::Registration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Backup(e) => e.kind(),
            ApiError::Auth(AuthError::PermissionDenied(_)) => "forbidden",
            ApiError::Auth(_) => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "Request failed");
        }

        let mut body = json!({
            "error": message,
            "kind": self.kind(),
            "status": status.as_u16(),
        });
        if let ApiError::Backup(BackupError::RestoreFailure { rolled_back, .. }) = &self {
            body["rolled_back"] = json!(rolled_back);
        }

        (status, Json(body)).into_response()
    }
}
