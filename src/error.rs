//! Error taxonomy for the mailbox connector.
//!
//! Every library operation returns [`ConnectorError`]. The enum is `Clone` so a
//! single refresh outcome can be handed to every caller waiting on it; for the
//! same reason variants carry rendered messages rather than source errors.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ConnectorError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// Missing or malformed secrets / client settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The callback URL could not be resolved into an absolute URL.
    #[error("{key} {reason}")]
    InvalidRedirectConfiguration { key: String, reason: String },

    /// The token endpoint rejected the authorization-code exchange, or the
    /// request never completed (`status` is `None`).
    #[error("token exchange failed ({}): {body}", status_label(.status))]
    TokenExchange { status: Option<u16>, body: String },

    /// The token endpoint answered without an access or refresh token.
    #[error("identity provider did not return both access and refresh tokens")]
    IncompleteTokenResponse,

    /// Refresh failed for a reason other than revocation.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The authenticated mailbox is not the allow-listed one.
    #[error("the signed-in account ({identity}) is not authorised for this mailbox")]
    UnauthorizedIdentity { identity: String },

    /// No usable credential; the authorization flow must be run again.
    #[error("mailbox is not connected; connect it from the admin dashboard")]
    NotConnected,

    /// A stored secret failed authentication. Carries no detail.
    #[error("stored credential could not be decrypted")]
    Decryption,

    /// The send-mail call was rejected, or never completed (`status` is `None`).
    #[error("mail delivery failed ({}): {body}", status_label(.status))]
    MailDelivery { status: Option<u16>, body: String },

    /// The outgoing message is not sendable as given.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The credential store could not be read or written.
    #[error("credential store error: {0}")]
    Storage(String),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "no response".to_string(),
    }
}

impl ConnectorError {
    /// Whether a caller may reasonably retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::TokenExchange { .. }
                | ConnectorError::RefreshFailed(_)
                | ConnectorError::MailDelivery { .. }
                | ConnectorError::Storage(_)
        )
    }

    /// Whether the admin has to run the authorization flow again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            ConnectorError::NotConnected
                | ConnectorError::UnauthorizedIdentity { .. }
                | ConnectorError::Decryption
        )
    }
}

impl From<rusqlite::Error> for ConnectorError {
    fn from(err: rusqlite::Error) -> Self {
        ConnectorError::Storage(err.to_string())
    }
}
