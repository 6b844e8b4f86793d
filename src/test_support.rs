//! Shared fixtures for unit tests.

use crate::config::{OAuthSettings, ProviderConfig, DEFAULT_SCOPES};
use crate::credentials::{TokenCipher, TokenSet};
use crate::oauth::{IdentityClient, ProviderEndpoints};
use crate::token::Clock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

pub const TEST_KEY: [u8; 32] = [7u8; 32];

pub fn test_settings() -> OAuthSettings {
    OAuthSettings {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        tenant: "common".to_string(),
        scopes: DEFAULT_SCOPES.to_string(),
        allowed_identity: "info@aktonz.example".to_string(),
        prompt: "consent".to_string(),
        login_hint: None,
    }
}

pub fn test_cipher() -> TokenCipher {
    TokenCipher::from_key(&TEST_KEY)
}

/// Client whose token, profile, and mail endpoints all live under `base_url`.
pub fn identity_client(base_url: &str) -> IdentityClient {
    identity_client_with_timeout(base_url, Duration::from_secs(5))
}

pub fn identity_client_with_timeout(base_url: &str, timeout: Duration) -> IdentityClient {
    let provider = ProviderConfig {
        authority_url: base_url.to_string(),
        graph_url: base_url.to_string(),
    };
    IdentityClient::new(ProviderEndpoints::new(&provider, "common"), test_settings(), timeout)
        .expect("client builds")
}

pub fn seeded_token_set(
    cipher: &TokenCipher,
    access_token: &str,
    refresh_token: &str,
    obtained_at_epoch_millis: i64,
    expires_in_seconds: u64,
) -> TokenSet {
    TokenSet {
        access_token_encrypted: cipher.encrypt(access_token).expect("encrypts"),
        refresh_token_encrypted: cipher.encrypt(refresh_token).expect("encrypts"),
        expires_in_seconds,
        obtained_at_epoch_millis,
        account_identity: "info@aktonz.example".to_string(),
    }
}

/// Manually driven clock.
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
