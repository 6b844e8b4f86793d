//! AES-256-GCM encryption for stored OAuth tokens.
//!
//! Each token is encrypted separately with a fresh nonce. The key must decode
//! to exactly 32 bytes (256 bits) of base64 and is provided through
//! `TOKEN_ENCRYPTION_KEY`.

use super::EncryptedSecret;
use crate::error::{ConnectorError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub(crate) const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
pub(crate) const TAG_SIZE: usize = 16;

/// Validates that the master key is exactly 32 bytes when base64 decoded.
///
/// Surrounding whitespace is ignored.
pub fn validate_key(key_base64: &str) -> Result<[u8; KEY_SIZE]> {
    let key_bytes = BASE64.decode(key_base64.trim()).map_err(|_| {
        ConnectorError::Configuration(
            "TOKEN_ENCRYPTION_KEY is not valid base64".to_string(),
        )
    })?;

    key_bytes.as_slice().try_into().map_err(|_| {
        ConnectorError::Configuration(format!(
            "TOKEN_ENCRYPTION_KEY must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ))
    })
}

/// Authenticated encryption of short secrets under one key.
///
/// The key is validated once at construction; the cipher is then reused for
/// every token.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Builds a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        let key = validate_key(key_base64)?;
        Ok(Self::from_key(&key))
    }

    pub fn from_key(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypts `plaintext` under a freshly generated random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret> {
        // Never reuse a nonce under the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| ConnectorError::Configuration("token encryption failed".to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let auth_tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(EncryptedSecret {
            nonce: nonce.to_vec(),
            auth_tag,
            ciphertext: sealed,
        })
    }

    /// Decrypts and authenticates `secret`.
    ///
    /// Wrong key, tampered bytes, and malformed records all fail with the same
    /// [`ConnectorError::Decryption`].
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String> {
        if secret.nonce.len() != NONCE_SIZE || secret.auth_tag.len() != TAG_SIZE {
            return Err(ConnectorError::Decryption);
        }

        let mut sealed = Vec::with_capacity(secret.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&secret.ciphertext);
        sealed.extend_from_slice(&secret.auth_tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&secret.nonce), sealed.as_ref())
            .map_err(|_| ConnectorError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| ConnectorError::Decryption)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}
