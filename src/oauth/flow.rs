//! Authorization-code flow for the allow-listed mailbox.
//!
//! Converts a one-time authorization code into the persisted [`TokenSet`],
//! gated by the mailbox identity. Nothing is written unless every step
//! succeeds, so a failed attempt leaves any earlier credential in place.

use super::exchange::IdentityClient;
use crate::credentials::{CredentialStore, TokenCipher, TokenSet};
use crate::error::{ConnectorError, Result};
use crate::token::Clock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// The mailbox a successful flow connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAccount {
    pub account: String,
    pub expires_in_seconds: u64,
}

pub struct AuthorizationFlow {
    client: IdentityClient,
    cipher: TokenCipher,
    store: Arc<CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl AuthorizationFlow {
    pub fn new(
        client: IdentityClient,
        cipher: TokenCipher,
        store: Arc<CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            cipher,
            store,
            clock,
        }
    }

    /// Provider sign-in URL carrying `state` and `redirect_uri`.
    pub fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        self.client
            .endpoints()
            .build_authorize_url(self.client.settings(), state, redirect_uri)
    }

    /// Exchanges `code`, verifies the identity, and stores the new credential.
    ///
    /// `redirect_uri` must be the same value used to build the authorize URL.
    pub async fn complete(&self, code: &str, redirect_uri: &str) -> Result<ConnectedAccount> {
        let tokens = self.client.exchange_code(code, redirect_uri).await?;

        let profile = self.client.fetch_profile(&tokens.access_token).await?;
        let identity = profile.identity().unwrap_or_default().to_string();
        let allowed = self.client.settings().allowed_identity.trim();

        if identity.is_empty() || !identity.eq_ignore_ascii_case(allowed) {
            let attempted = if identity.is_empty() {
                "unknown account".to_string()
            } else {
                identity
            };
            warn!(identity = %attempted, "Rejected sign-in from account outside the allow-list");
            return Err(ConnectorError::UnauthorizedIdentity {
                identity: attempted,
            });
        }

        let token_set = TokenSet {
            access_token_encrypted: self.cipher.encrypt(&tokens.access_token)?,
            refresh_token_encrypted: self.cipher.encrypt(&tokens.refresh_token)?,
            expires_in_seconds: tokens.expires_in,
            obtained_at_epoch_millis: self.clock.now_millis(),
            account_identity: identity.clone(),
        };
        self.store.save(&token_set)?;

        info!(
            identity = %identity,
            expires_in = tokens.expires_in,
            "Mailbox connected"
        );

        Ok(ConnectedAccount {
            account: identity,
            expires_in_seconds: tokens.expires_in,
        })
    }
}
