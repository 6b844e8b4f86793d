//! Token endpoint and profile calls.
//!
//! Handles exchanging authorization codes for tokens, refreshing tokens, and
//! looking up the signed-in identity.

use super::provider::ProviderEndpoints;
use crate::config::OAuthSettings;
use crate::error::{ConnectorError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// OAuth error codes that mean the refresh token is no longer usable.
const REVOKED_ERROR_CODES: &[&str] = &[
    "invalid_grant",
    "interaction_required",
    "consent_required",
    "login_required",
];

/// OAuth error codes that mean this application's own credentials were refused.
const CLIENT_ERROR_CODES: &[&str] = &["invalid_client", "unauthorized_client"];

/// Lifetime assumed when a token response carries no usable `expires_in`.
/// Kept short so the token is re-validated soon after.
pub const FALLBACK_EXPIRES_IN_SECONDS: u64 = 300;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    ext_expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    /// Access token lifetime in seconds.
    ///
    /// A missing or zero `expires_in` falls back to `ext_expires_in`, then to
    /// [`FALLBACK_EXPIRES_IN_SECONDS`].
    fn lifetime_seconds(&self) -> u64 {
        if let Some(seconds) = self.expires_in.filter(|s| *s > 0) {
            return seconds;
        }
        if let Some(seconds) = self.ext_expires_in.filter(|s| *s > 0) {
            warn!(ext_expires_in = seconds, "Token response has no expires_in; using ext_expires_in");
            return seconds;
        }
        warn!(
            fallback_seconds = FALLBACK_EXPIRES_IN_SECONDS,
            "Token response has no usable lifetime; assuming a short one"
        );
        FALLBACK_EXPIRES_IN_SECONDS
    }
}

/// OAuth error body
#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: String,
}

/// Profile of the signed-in identity.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
}

impl Profile {
    /// Principal name, falling back to the mail address.
    pub fn identity(&self) -> Option<&str> {
        [&self.user_principal_name, &self.mail]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

/// Tokens returned by the authorization-code exchange.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Tokens returned by a refresh. The provider may not rotate the refresh token.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// Why a refresh did not produce tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The provider rejected the refresh token itself.
    Revoked(String),
    /// The provider rejected the client id or secret; the refresh token may
    /// still be good.
    Client(String),
    /// Anything else: network error, timeout, 5xx, malformed body.
    Transport(String),
}

type RefreshResult = std::result::Result<RefreshedTokens, RefreshFailure>;

/// Sorts a failed refresh response by its OAuth `error` code.
///
/// Only 400 and 401 responses are inspected; the status alone never decides.
pub fn classify_refresh_error(status: u16, body: &str, message: String) -> RefreshFailure {
    let code = match status {
        400 | 401 => serde_json::from_str::<ErrorResponse>(body).ok().map(|e| e.error),
        _ => None,
    };

    match code.as_deref() {
        Some(code) if REVOKED_ERROR_CODES.contains(&code) => RefreshFailure::Revoked(message),
        Some(code) if CLIENT_ERROR_CODES.contains(&code) => RefreshFailure::Client(message),
        _ => RefreshFailure::Transport(message),
    }
}

/// HTTP client for the identity provider.
#[derive(Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    settings: OAuthSettings,
}

impl IdentityClient {
    /// Every request is bounded by `timeout`.
    pub fn new(
        endpoints: ProviderEndpoints,
        settings: OAuthSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoints,
            settings,
        })
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// Exchange authorization code for an access/refresh token pair
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenPair> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("scope", self.settings.scopes.as_str()),
        ];

        debug!(token_url = %self.endpoints.token_url, "Exchanging authorization code for token");

        let response = self
            .http
            .post(&self.endpoints.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ConnectorError::TokenExchange {
                status: None,
                body: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ConnectorError::TokenExchange {
                status: Some(status.as_u16()),
                body,
            });
        }

        let token_response: TokenResponse =
            response.json().await.map_err(|e| ConnectorError::TokenExchange {
                status: Some(status.as_u16()),
                body: format!("Failed to parse token response: {}", e),
            })?;

        debug!(
            has_refresh_token = token_response.refresh_token.is_some(),
            expires_in = ?token_response.expires_in,
            token_type = ?token_response.token_type,
            "Token exchange successful"
        );

        let expires_in = token_response.lifetime_seconds();
        match (token_response.access_token, token_response.refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                Ok(TokenPair {
                    access_token,
                    refresh_token,
                    expires_in,
                })
            }
            _ => Err(ConnectorError::IncompleteTokenResponse),
        }
    }

    /// Redeems `refresh_token` for a new token pair.
    pub async fn refresh(&self, refresh_token: &str) -> RefreshResult {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("scope", self.settings.scopes.as_str()),
        ];

        let response = self
            .http
            .post(&self.endpoints.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| RefreshFailure::Transport(format!("Failed to send token refresh request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            let message = format!("Token refresh failed with status {}: {}", status, body);
            return Err(classify_refresh_error(status.as_u16(), &body, message));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| RefreshFailure::Transport(format!("Failed to parse token refresh response: {}", e)))?;

        let expires_in = token_response.lifetime_seconds();
        let access_token = token_response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                RefreshFailure::Transport("Token refresh response has no access token".to_string())
            })?;

        Ok(RefreshedTokens {
            access_token,
            refresh_token: token_response.refresh_token.filter(|t| !t.is_empty()),
            expires_in,
        })
    }

    /// Looks up the identity behind `access_token`.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<Profile> {
        let response = self
            .http
            .get(self.endpoints.profile_url())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ConnectorError::TokenExchange {
                status: None,
                body: format!("Unable to fetch profile: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ConnectorError::TokenExchange {
                status: Some(status.as_u16()),
                body: format!("Unable to fetch profile: {}", body),
            });
        }

        response.json().await.map_err(|e| ConnectorError::TokenExchange {
            status: Some(status.as_u16()),
            body: format!("Failed to parse profile: {}", e),
        })
    }
}
