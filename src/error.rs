//! Error types for Gatehouse
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for a structured JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Every failure is handled at the boundary of the handler that detects
/// it. Nothing is retried.
#[derive(Debug, Error)]
pub enum AppError {
    /// No session, or the session failed validation (401)
    #[error("Session expired or not authenticated")]
    Unauthenticated,

    /// The provider reported an error on the callback (401)
    #[error("Authentication failed: {0}")]
    AuthenticationDenied(String),

    /// Callback state does not match the pending login (401)
    #[error("Authentication failed: state mismatch. Please try logging in again.")]
    StateMismatch,

    /// Identity claims were missing or unusable (401)
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Neither the id token nor the userinfo endpoint yielded an identity (401)
    #[error("Identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// Network failure talking to the identity provider (503)
    #[error("Authentication service unavailable: {0}")]
    ProviderUnavailable(String),

    /// The identity provider answered with an error (401)
    #[error("Identity provider rejected the request: {0}")]
    ProviderRejected(String),

    /// Network failure talking to GitHub (503)
    #[error("Failed to connect to GitHub: {0}")]
    RemoteUnavailable(String),

    /// GitHub answered with a non-success status
    #[error("Failed to push to GitHub: {message}")]
    RemoteRejected { status: u16, message: String },

    /// Repository is not in `owner/name` form (400)
    #[error("Invalid repository name '{0}'. Use 'owner/repo' format.")]
    InvalidRepository(String),

    /// Session carries no GitHub access token (401)
    #[error("GitHub token not found. Please sign in with GitHub first.")]
    MissingCredential,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Unhandled error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Stable machine-readable tag for the error, used in the response
    /// body and as the metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "unauthenticated",
            AppError::AuthenticationDenied(_) => "authentication_denied",
            AppError::StateMismatch => "state_mismatch",
            AppError::InvalidIdentity(_) => "invalid_identity",
            AppError::IdentityUnavailable(_) => "identity_unavailable",
            AppError::ProviderUnavailable(_) => "provider_unavailable",
            AppError::ProviderRejected(_) => "provider_rejected",
            AppError::RemoteUnavailable(_) => "remote_unavailable",
            AppError::RemoteRejected { .. } => "remote_rejected",
            AppError::InvalidRepository(_) => "invalid_repository",
            AppError::MissingCredential => "missing_credential",
            AppError::Validation(_) => "validation",
            AppError::NotFound => "not_found",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    /// HTTP status for the error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated
            | AppError::AuthenticationDenied(_)
            | AppError::StateMismatch
            | AppError::InvalidIdentity(_)
            | AppError::IdentityUnavailable(_)
            | AppError::ProviderRejected(_)
            | AppError::MissingCredential => StatusCode::UNAUTHORIZED,
            AppError::ProviderUnavailable(_) | AppError::RemoteUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            // Client errors from GitHub pass through; anything else is a bad gateway.
            AppError::RemoteRejected { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(StatusCode::is_client_error)
                .unwrap_or(StatusCode::BAD_GATEWAY),
            AppError::InvalidRepository(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to its status code and a JSON body of the
    /// form `{"error": message, "type": kind}`.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let error_type = self.kind();

        if status.is_server_error() {
            tracing::error!(error = %self, error_type, "Request failed");
        } else {
            tracing::debug!(error = %self, error_type, "Request rejected");
        }

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[error_type])
            .inc();

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "type": error_type,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_failures_are_unauthorized() {
        for error in [
            AppError::AuthenticationDenied("denied".into()),
            AppError::StateMismatch,
            AppError::InvalidIdentity("no sub".into()),
            AppError::IdentityUnavailable("userinfo down".into()),
        ] {
            assert_eq!(error.status(), StatusCode::UNAUTHORIZED, "{error:?}");
        }
    }

    #[test]
    fn network_failures_are_service_unavailable() {
        assert_eq!(
            AppError::ProviderUnavailable("timeout".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::RemoteUnavailable("dns".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn remote_rejection_passes_client_errors_through() {
        let conflict = AppError::RemoteRejected {
            status: 409,
            message: "sha mismatch".into(),
        };
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let upstream_failure = AppError::RemoteRejected {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(upstream_failure.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn caller_input_errors_are_bad_requests() {
        assert_eq!(
            AppError::InvalidRepository("ownerrepo".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::MissingCredential.status(), StatusCode::UNAUTHORIZED);
    }
}
