//! Access token provider.
//!
//! Hands out a currently valid access token for the connected mailbox,
//! refreshing it through the token endpoint when it is within
//! [`SAFETY_MARGIN_MS`] of expiry.
//!
//! # States
//!
//! ```text
//!   NoCredential ──────────────────────────────→ Err(NotConnected)
//!   Valid ─────────────────────────────────────→ cached token, no network
//!   NearExpiry ──→ Refreshing ──┬─ ok ─────────→ new TokenSet saved, new token
//!                               ├─ revoked ────→ store cleared, Err(NotConnected)
//!                               ├─ bad client ─→ store kept, Err(Configuration)
//!                               └─ transport ──→ store kept, Err(RefreshFailed)
//! ```
//!
//! Refreshes are single-flight: while one is running, every other caller that
//! finds the token near expiry awaits that same refresh instead of starting
//! its own. Providers that rotate refresh tokens would otherwise reject the
//! second use of the old one.

use crate::credentials::{CredentialStore, TokenCipher, TokenSet};
use crate::error::{ConnectorError, Result};
use crate::oauth::{IdentityClient, RefreshFailure};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests;

/// Tokens this close to expiry are refreshed before use (90 seconds).
pub const SAFETY_MARGIN_MS: i64 = 90_000;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Where the stored credential stands relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoCredential,
    Valid,
    NearExpiry,
}

impl TokenState {
    pub fn of(token_set: Option<&TokenSet>, now_millis: i64) -> Self {
        match token_set {
            None => TokenState::NoCredential,
            Some(set) if now_millis < set.access_expiry_epoch_millis() - SAFETY_MARGIN_MS => {
                TokenState::Valid
            }
            Some(_) => TokenState::NearExpiry,
        }
    }
}

/// Read-only connection summary for the admin UI.
///
/// Served without authentication, so it names no account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Access token expiry, epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

struct Inner {
    store: Arc<CredentialStore>,
    cipher: TokenCipher,
    client: IdentityClient,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<Option<InFlight>>,
}

/// Returns valid access tokens, refreshing through a single shared in-flight
/// operation.
pub struct AccessTokenProvider {
    inner: Arc<Inner>,
    next_id: AtomicU64,
}

impl AccessTokenProvider {
    pub fn new(
        store: Arc<CredentialStore>,
        cipher: TokenCipher,
        client: IdentityClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                cipher,
                client,
                clock,
                in_flight: Mutex::new(None),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Returns a currently valid access token.
    ///
    /// # Errors
    /// - `NotConnected` if nothing is stored or the provider revoked the
    ///   refresh token (the store is cleared in that case)
    /// - `RefreshFailed` if the refresh could not complete; the stored
    ///   credential is kept for a later retry
    /// - `Configuration` if the token endpoint rejects the client credentials
    /// - `Decryption` if the stored record fails authentication
    ///
    /// Must be called within a Tokio runtime: refreshes run on a spawned task.
    pub async fn access_token(&self) -> Result<String> {
        let token_set = self.inner.store.load()?;
        let now = self.inner.clock.now_millis();

        match (TokenState::of(token_set.as_ref(), now), token_set) {
            (TokenState::Valid, Some(set)) => self.inner.cipher.decrypt(&set.access_token_encrypted),
            (TokenState::NearExpiry, Some(_)) => self.shared_refresh().await,
            _ => Err(ConnectorError::NotConnected),
        }
    }

    /// Joins the refresh already running, or starts one.
    ///
    /// The refresh runs on its own task, so it completes and saves the rotated
    /// tokens even if every caller waiting on it is dropped.
    async fn shared_refresh(&self) -> Result<String> {
        let future = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                Some(running) => {
                    debug!(refresh_id = running.id, "Joining in-flight token refresh");
                    running.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    // `retire` needs the slot lock held here, so the entry is
                    // stored before the task can clear it
                    let task = tokio::spawn(async move {
                        let result = inner.refresh().await;
                        inner.retire(id);
                        result
                    });
                    let future = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(ConnectorError::RefreshFailed(format!(
                                "refresh task did not complete: {}",
                                e
                            )))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }

    /// Connection summary derived from the store; never triggers a refresh.
    pub fn status(&self) -> Result<ConnectionStatus> {
        let Some(token_set) = self.inner.store.load()? else {
            return Ok(ConnectionStatus {
                connected: false,
                expires_at: None,
                expires_in_seconds: None,
            });
        };

        let expires_at = token_set.access_expiry_epoch_millis();
        let remaining_ms = (expires_at - self.inner.clock.now_millis()).max(0);
        // Round to the nearest second
        let expires_in_seconds = u64::try_from((remaining_ms + 500) / 1000).unwrap_or(0);

        Ok(ConnectionStatus {
            connected: true,
            expires_at: Some(expires_at),
            expires_in_seconds: Some(expires_in_seconds),
        })
    }

    /// Removes the stored credential.
    ///
    /// Returns `true` if a credential was present.
    pub fn disconnect(&self) -> Result<bool> {
        let removed = self.inner.store.clear()?;
        info!(removed, "Mailbox disconnected");
        Ok(removed)
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drops the finished refresh so the next expiry starts a new one.
    fn retire(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().map_or(false, |running| running.id == id) {
            *slot = None;
        }
    }

    async fn refresh(&self) -> Result<String> {
        // Re-read: another caller or process may have refreshed already
        let current = self
            .store
            .load()?
            .ok_or(ConnectorError::NotConnected)?;
        if TokenState::of(Some(&current), self.clock.now_millis()) == TokenState::Valid {
            debug!("Stored token was refreshed elsewhere; reusing it");
            return self.cipher.decrypt(&current.access_token_encrypted);
        }

        let refresh_token = self.cipher.decrypt(&current.refresh_token_encrypted)?;

        info!(identity = %current.account_identity, "Refreshing access token");

        match self.client.refresh(&refresh_token).await {
            Ok(tokens) => {
                // Keep the existing refresh token if the provider did not rotate it
                let next_refresh = tokens.refresh_token.unwrap_or(refresh_token);

                let replacement = TokenSet {
                    access_token_encrypted: self.cipher.encrypt(&tokens.access_token)?,
                    refresh_token_encrypted: self.cipher.encrypt(&next_refresh)?,
                    expires_in_seconds: tokens.expires_in,
                    obtained_at_epoch_millis: self.clock.now_millis(),
                    account_identity: current.account_identity.clone(),
                };
                self.store.save(&replacement)?;

                info!(
                    identity = %current.account_identity,
                    expires_in = tokens.expires_in,
                    "Access token refreshed"
                );
                Ok(tokens.access_token)
            }
            Err(RefreshFailure::Revoked(reason)) => {
                warn!(
                    identity = %current.account_identity,
                    error = %reason,
                    "Refresh token rejected; clearing stored credential"
                );
                self.store.clear_if_unchanged(&current)?;
                Err(ConnectorError::NotConnected)
            }
            Err(RefreshFailure::Client(reason)) => {
                error!(
                    error = %reason,
                    "Token endpoint rejected the client credentials; keeping stored credential"
                );
                Err(ConnectorError::Configuration(reason))
            }
            Err(RefreshFailure::Transport(reason)) => {
                error!(
                    identity = %current.account_identity,
                    error = %reason,
                    "Token refresh failed; keeping stored credential"
                );
                Err(ConnectorError::RefreshFailed(reason))
            }
        }
    }
}
