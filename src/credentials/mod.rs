//! Encrypted credential storage for the connected mailbox.
//!
//! Exactly one [`TokenSet`] exists at a time. It lives in a shared SQLite
//! database under a fixed key so every process instance pointed at the same
//! file observes the same credential.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenSet                           │
//! │  - encrypted access / refresh tokens     │
//! │  - obtained_at + expires_in              │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (TokenCipher)        (TokenCipher)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - save / load / clear                   │
//! │  - whole-record replacement only         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - Tokens are encrypted at rest with AES-256-GCM
//! - Each token has its own nonce (never reused)
//! - The master key is held in memory only (from env var)
//! - The record is written in a single statement, never field by field

use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use encryption::{validate_key, TokenCipher};
pub use storage::{CredentialStore, TOKEN_KEY};

/// Output of one authenticated-encryption call.
///
/// Each field is stored as standard base64.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSecret {
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// The single persisted credential for the allow-listed mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access_token_encrypted: EncryptedSecret,
    pub refresh_token_encrypted: EncryptedSecret,
    pub expires_in_seconds: u64,
    pub obtained_at_epoch_millis: i64,
    /// Verified principal name of the mailbox
    pub account_identity: String,
}

impl TokenSet {
    /// When the access token stops being valid, derived from its two stored
    /// components.
    pub fn access_expiry_epoch_millis(&self) -> i64 {
        let lifetime_ms = i64::try_from(self.expires_in_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.obtained_at_epoch_millis.saturating_add(lifetime_ms)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
