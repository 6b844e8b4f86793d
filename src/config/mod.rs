pub mod env;

use crate::error::{ConnectorError, Result};
use crate::oauth::RedirectSettings;
use anyhow::Context;
use serde::Deserialize;

/// Default scopes: offline access + mail-send + profile-read.
pub const DEFAULT_SCOPES: &str = "offline_access Mail.Send User.Read";

/// Multi-tenant sentinel used when no tenant is configured.
pub const DEFAULT_TENANT: &str = "common";

pub const DEFAULT_PROMPT: &str = "consent";

/// OAuth client settings for the identity provider.
#[derive(Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub tenant: String,
    /// Space-separated scope list
    pub scopes: String,
    /// The only mailbox identity allowed to back the connector
    pub allowed_identity: String,
    pub prompt: String,
    pub login_hint: Option<String>,
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant", &self.tenant)
            .field("scopes", &self.scopes)
            .field("allowed_identity", &self.allowed_identity)
            .field("prompt", &self.prompt)
            .field("login_hint", &self.login_hint)
            .finish()
    }
}

/// Secrets and identity settings resolved from the environment.
#[derive(Clone)]
pub struct ConnectorConfig {
    pub oauth: OAuthSettings,
    /// Base64-encoded 32-byte key (validated by the cipher)
    pub encryption_key: String,
    pub redirect: RedirectSettings,
    /// Bearer token guarding the admin endpoints; `None` leaves them open.
    pub admin_token: Option<String>,
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("oauth", &self.oauth)
            .field("encryption_key", &"<redacted>")
            .field("redirect", &self.redirect)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn required<F>(keys: &[&'static str], lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    env::pick(keys, lookup).ok_or_else(|| {
        ConnectorError::Configuration(format!(
            "{} environment variable is required",
            env::describe_keys(keys)
        ))
    })
}

impl ConnectorConfig {
    /// Resolves every setting through `lookup`.
    ///
    /// `redirect_defaults` supplies the canonical host and local port used
    /// when no redirect override is configured.
    pub fn from_lookup<F>(lookup: F, redirect_defaults: &RedirectConfig) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let oauth = OAuthSettings {
            client_id: required(env::CLIENT_ID_KEYS, &lookup)?,
            client_secret: required(env::CLIENT_SECRET_KEYS, &lookup)?,
            tenant: env::pick(env::TENANT_KEYS, &lookup)
                .unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            scopes: env::pick(env::SCOPE_KEYS, &lookup)
                .unwrap_or_else(|| DEFAULT_SCOPES.to_string()),
            allowed_identity: required(env::ALLOWED_IDENTITY_KEYS, &lookup)?,
            prompt: env::pick(env::PROMPT_KEYS, &lookup)
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            login_hint: env::pick(env::LOGIN_HINT_KEYS, &lookup),
        };

        let encryption_key = required(env::ENCRYPTION_KEY_KEYS, &lookup)?;

        let redirect = RedirectSettings {
            production: env::pick_with_key(env::PROD_REDIRECT_KEYS, &lookup),
            local: env::pick_with_key(env::DEV_REDIRECT_KEYS, &lookup),
            canonical_host: redirect_defaults.canonical_host.clone(),
            local_port: redirect_defaults.local_port,
        };

        Ok(Self {
            oauth,
            encryption_key,
            redirect,
            admin_token: env::pick(env::ADMIN_TOKEN_KEYS, &lookup),
        })
    }

    /// Resolves every setting from the process environment.
    pub fn from_env(redirect_defaults: &RedirectConfig) -> Result<Self> {
        Self::from_lookup(env::process_env, redirect_defaults)
    }
}

/// Complete runtime configuration (non-secret settings)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub redirect: RedirectConfig,
}

/// Admin API listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Credential database
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "credentials.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Outbound HTTP calls (token, profile, send-mail)
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    15
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Identity provider and mail API base URLs
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
}

fn default_authority_url() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_graph_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authority_url: default_authority_url(),
            graph_url: default_graph_url(),
        }
    }
}

/// Fallbacks for the callback URL when no override is configured
#[derive(Debug, Clone, Deserialize)]
pub struct RedirectConfig {
    #[serde(default = "default_canonical_host")]
    pub canonical_host: String,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
}

fn default_canonical_host() -> String {
    "aktonz.com".to_string()
}

fn default_local_port() -> u16 {
    3000
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            canonical_host: default_canonical_host(),
            local_port: default_local_port(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: FileConfig = toml::from_str(&contents).context("Failed to parse config file")?;
    Ok(config)
}
