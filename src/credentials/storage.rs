//! Singleton credential storage using SQLite.
//!
//! The database is a small key-value table. The connector's [`TokenSet`] lives
//! under the fixed [`TOKEN_KEY`]; it is serialized to JSON and written in one
//! statement so readers see either the previous record or the new one.

use super::TokenSet;
use crate::error::{ConnectorError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Well-known key of the connector's single credential record.
pub const TOKEN_KEY: &str = "mail:oauth:tokens";

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE kv_store (
///     key TEXT PRIMARY KEY,
///     value TEXT NOT NULL,        -- JSON TokenSet (tokens already encrypted)
///     updated_at TEXT NOT NULL    -- ISO 8601 timestamp
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - Separate processes coordinate through SQLite's file locking
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// `":memory:"` gives a private, process-local store (tests).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ConnectorError::Storage("credential store lock poisoned".to_string()))
    }

    /// Replaces the stored credential with `token_set` in full.
    pub fn save(&self, token_set: &TokenSet) -> Result<()> {
        let value = serde_json::to_string(token_set)
            .map_err(|e| ConnectorError::Storage(format!("failed to serialize credential: {}", e)))?;
        let now = Utc::now().to_rfc3339();

        self.conn()?.execute(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![TOKEN_KEY, value, now],
        )?;

        Ok(())
    }

    /// Loads the stored credential, if any.
    ///
    /// A record that no longer parses is reported as
    /// [`ConnectorError::Decryption`], the same as a record whose tokens fail
    /// authentication.
    pub fn load(&self) -> Result<Option<TokenSet>> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|_| ConnectorError::Decryption),
            None => Ok(None),
        }
    }

    /// Deletes the stored credential.
    ///
    /// Returns `true` if a credential was present.
    pub fn clear(&self) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute("DELETE FROM kv_store WHERE key = ?1", params![TOKEN_KEY])?;

        Ok(rows_affected > 0)
    }

    /// Deletes the stored credential only if it still equals `expected`.
    ///
    /// A record written in the meantime (a fresh connect, or a refresh by
    /// another process) survives. Returns `true` if a row was removed.
    pub fn clear_if_unchanged(&self, expected: &TokenSet) -> Result<bool> {
        let value = serde_json::to_string(expected)
            .map_err(|e| ConnectorError::Storage(format!("failed to serialize credential: {}", e)))?;

        let rows_affected = self.conn()?.execute(
            "DELETE FROM kv_store WHERE key = ?1 AND value = ?2",
            params![TOKEN_KEY, value],
        )?;

        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::EncryptedSecret;

    fn create_test_store() -> CredentialStore {
        CredentialStore::new(":memory:").expect("Failed to create test store")
    }

    fn create_test_token_set(obtained_at: i64) -> TokenSet {
        let secret = |fill: u8| EncryptedSecret {
            nonce: vec![fill; 12],
            auth_tag: vec![fill; 16],
            ciphertext: vec![fill; 20],
        };
        TokenSet {
            access_token_encrypted: secret(1),
            refresh_token_encrypted: secret(2),
            expires_in_seconds: 3600,
            obtained_at_epoch_millis: obtained_at,
            account_identity: "info@aktonz.example".to_string(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = create_test_store();
        let token_set = create_test_token_set(1_000);

        store.save(&token_set).expect("Failed to save");

        let loaded = store
            .load()
            .expect("Failed to load")
            .expect("Credential not found");
        assert_eq!(loaded, token_set);
    }

    #[test]
    fn test_load_empty() {
        let store = create_test_store();
        assert!(store.load().expect("Failed to load").is_none());
    }

    #[test]
    fn test_save_replaces_whole_record() {
        let store = create_test_store();
        store.save(&create_test_token_set(1_000)).unwrap();

        let mut replacement = create_test_token_set(2_000);
        replacement.expires_in_seconds = 60;
        replacement.account_identity = "other@aktonz.example".to_string();
        store.save(&replacement).unwrap();

        assert_eq!(store.load().unwrap().unwrap(), replacement);
    }

    #[test]
    fn test_clear() {
        let store = create_test_store();
        store.save(&create_test_token_set(1_000)).unwrap();

        assert!(store.clear().unwrap());
        assert!(store.load().unwrap().is_none());

        // Clearing again reports nothing removed
        assert!(!store.clear().unwrap());
    }

    #[test]
    fn test_clear_if_unchanged_spares_newer_record() {
        let store = create_test_store();
        let stale = create_test_token_set(1_000);
        let newer = create_test_token_set(2_000);

        store.save(&newer).unwrap();
        assert!(!store.clear_if_unchanged(&stale).unwrap());
        assert_eq!(store.load().unwrap(), Some(newer.clone()));

        assert!(store.clear_if_unchanged(&newer).unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupted_record_reports_decryption_error() {
        let store = create_test_store();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, 'not json', 'now')",
                params![TOKEN_KEY],
            )
            .unwrap();

        assert_eq!(store.load(), Err(ConnectorError::Decryption));
    }

    #[test]
    fn test_instances_share_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.db");

        let first = CredentialStore::new(&path).unwrap();
        let second = CredentialStore::new(&path).unwrap();

        let token_set = create_test_token_set(5_000);
        first.save(&token_set).unwrap();
        assert_eq!(second.load().unwrap(), Some(token_set));

        second.clear().unwrap();
        assert!(first.load().unwrap().is_none());
    }
}
