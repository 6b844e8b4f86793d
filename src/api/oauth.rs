//! Mailbox connection endpoints.
//!
//! - `GET  /api/mail/oauth/connect`    → redirect to the identity provider
//! - `GET  /api/mail/oauth/cb`         → finish the authorization flow
//! - `GET  /api/mail/oauth/status`     → connection summary, never refreshes
//! - `POST /api/mail/oauth/disconnect` → forget the stored credential
//! - `POST /api/mail/send`             → send mail as the connected mailbox

use super::AppError;
use crate::auth::authorize_admin;
use crate::mail::{MailDispatcher, OutgoingMessage};
use crate::oauth::{
    resolve_redirect_uri, AuthorizationFlow, RedirectContext, RedirectSettings, StateManager,
    CALLBACK_PATH,
};
use crate::token::{AccessTokenProvider, ConnectionStatus};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared application state for the mail endpoints
pub struct MailAppState {
    pub flow: Arc<AuthorizationFlow>,
    pub tokens: Arc<AccessTokenProvider>,
    pub dispatcher: Arc<MailDispatcher>,
    pub state_manager: StateManager,
    pub redirect: RedirectSettings,
    pub admin_token: Option<String>,
}

impl MailAppState {
    fn check_admin(&self, headers: &HeaderMap) -> Result<(), AppError> {
        authorize_admin(headers, self.admin_token.as_deref()).map_err(|e| {
            warn!(error = %e, "Rejected admin request");
            AppError::Unauthorized(e.to_string())
        })
    }
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedResponse {
    connected: bool,
    account: String,
    expires_in_seconds: u64,
}

#[derive(Serialize)]
struct DisconnectedResponse {
    disconnected: bool,
}

#[derive(Serialize)]
struct SentResponse {
    sent: bool,
}

/// Create the mail router
pub fn create_mail_router(state: MailAppState) -> Router {
    Router::new()
        .route("/api/mail/oauth/connect", get(connect))
        .route(CALLBACK_PATH, get(callback))
        .route("/api/mail/oauth/status", get(status))
        .route("/api/mail/oauth/disconnect", post(disconnect))
        .route("/api/mail/send", post(send))
        .with_state(Arc::new(state))
}

/// GET /api/mail/oauth/connect
///
/// Redirects the admin to the provider's sign-in page. The callback URL is
/// resolved from this request and remembered with the CSRF state so the code
/// exchange sends the identical value.
async fn connect(
    State(state): State<Arc<MailAppState>>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    state.check_admin(&headers)?;

    let ctx = RedirectContext::from_headers(&headers);
    let redirect_uri = resolve_redirect_uri(&state.redirect, &ctx)?;

    let csrf_state = state.state_manager.create_state(&redirect_uri);
    let auth_url = state.flow.authorize_url(&csrf_state, &redirect_uri);

    info!(
        redirect_uri = %redirect_uri,
        local = ctx.is_local_environment,
        "Redirecting to identity provider"
    );

    Ok(Redirect::temporary(&auth_url))
}

/// GET /api/mail/oauth/cb
///
/// # Security
/// - Validates the single-use CSRF state
/// - Only the allow-listed mailbox is ever stored
async fn callback(
    State(state): State<Arc<MailAppState>>,
    headers: HeaderMap,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response, AppError> {
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    let entry = state
        .state_manager
        .validate_and_consume(&csrf_state)
        .ok_or_else(|| {
            warn!("Invalid or expired OAuth state");
            AppError::Unauthorized("Invalid or expired OAuth state".to_string())
        })?;

    // The exchange uses the URI sent with the authorize request; re-resolving
    // here only reports drift and never blocks the callback
    match resolve_redirect_uri(&state.redirect, &RedirectContext::from_headers(&headers)) {
        Ok(resolved) if resolved != entry.redirect_uri => warn!(
            connect = %entry.redirect_uri,
            callback = %resolved,
            "Callback resolved a different redirect URI; using the one from connect"
        ),
        Ok(_) => {}
        Err(e) => warn!(
            connect = %entry.redirect_uri,
            error = %e,
            "Callback could not re-resolve the redirect URI; using the one from connect"
        ),
    }

    debug!("CSRF state validated");

    let account = state.flow.complete(&code, &entry.redirect_uri).await?;

    Ok(Json(ConnectedResponse {
        connected: true,
        account: account.account,
        expires_in_seconds: account.expires_in_seconds,
    })
    .into_response())
}

/// GET /api/mail/oauth/status
async fn status(
    State(state): State<Arc<MailAppState>>,
) -> Result<Json<ConnectionStatus>, AppError> {
    Ok(Json(state.tokens.status()?))
}

/// POST /api/mail/oauth/disconnect
async fn disconnect(
    State(state): State<Arc<MailAppState>>,
    headers: HeaderMap,
) -> Result<Json<DisconnectedResponse>, AppError> {
    state.check_admin(&headers)?;
    state.tokens.disconnect()?;
    Ok(Json(DisconnectedResponse { disconnected: true }))
}

/// POST /api/mail/send
async fn send(
    State(state): State<Arc<MailAppState>>,
    headers: HeaderMap,
    Json(message): Json<OutgoingMessage>,
) -> Result<Response, AppError> {
    state.check_admin(&headers)?;
    state.dispatcher.send(&message).await?;
    Ok((StatusCode::ACCEPTED, Json(SentResponse { sent: true })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_callback_deserialization() {
        let query = "code=auth_code_123&state=csrf_state_456";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.code, Some("auth_code_123".to_string()));
        assert_eq!(callback.state, Some("csrf_state_456".to_string()));
        assert_eq!(callback.error, None);

        let query = "error=access_denied&error_description=User+cancelled";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.error, Some("access_denied".to_string()));
        assert_eq!(callback.error_description, Some("User cancelled".to_string()));
        assert_eq!(callback.code, None);
    }

    #[test]
    fn test_connected_response_serialization() {
        let response = ConnectedResponse {
            connected: true,
            account: "info@aktonz.example".to_string(),
            expires_in_seconds: 3600,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"connected\":true"));
        assert!(json.contains("\"expiresInSeconds\":3600"));
    }
}
