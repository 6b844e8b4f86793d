// Admin HTTP surface for the mailbox connection

pub mod oauth;

pub use oauth::{create_mail_router, MailAppState};

use crate::error::ConnectorError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, warn};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for the mail endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Upstream bodies and internal details are logged here and replaced with a
/// fixed message in the response.
impl From<ConnectorError> for AppError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Configuration(detail) => {
                error!(error = %detail, "Mail connector misconfigured");
                AppError::ServerError("Mail connector is not configured".to_string())
            }
            ConnectorError::InvalidRedirectConfiguration { .. } => {
                error!(error = %err, "Redirect URI could not be resolved");
                AppError::ServerError(err.to_string())
            }
            ConnectorError::TokenExchange { .. } | ConnectorError::IncompleteTokenResponse => {
                error!(error = %err, "Authorization code exchange failed");
                AppError::BadGateway("Failed to exchange authorization code".to_string())
            }
            ConnectorError::RefreshFailed(detail) => {
                error!(error = %detail, "Access token refresh failed");
                AppError::BadGateway("Failed to refresh the mailbox access token".to_string())
            }
            ConnectorError::MailDelivery { .. } => {
                error!(error = %err, "Mail delivery failed");
                AppError::BadGateway("Mail delivery failed".to_string())
            }
            ConnectorError::UnauthorizedIdentity { .. } => {
                warn!(error = %err, "Mailbox connection refused");
                AppError::Forbidden(err.to_string())
            }
            ConnectorError::NotConnected => AppError::Conflict(err.to_string()),
            ConnectorError::InvalidMessage(_) => AppError::BadRequest(err.to_string()),
            ConnectorError::Decryption => {
                error!("Stored credential failed to decrypt");
                AppError::ServerError(
                    "Stored credential could not be read; reconnect the mailbox".to_string(),
                )
            }
            ConnectorError::Storage(detail) => {
                error!(error = %detail, "Credential store failure");
                AppError::ServerError("Credential store unavailable".to_string())
            }
        }
    }
}
