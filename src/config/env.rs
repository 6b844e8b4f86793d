//! Environment variable aliasing.
//!
//! Each logical setting is recognized under several historical names. The
//! lookup walks the aliases in order and takes the first usable value.
//! Lookups go through a closure so resolution can be tested without touching
//! the process environment.

pub const CLIENT_ID_KEYS: &[&str] = &[
    "MS_CLIENT_ID",
    "MICROSOFT_CLIENT_ID",
    "NEXT_PUBLIC_MICROSOFT_CLIENT_ID",
    "AZURE_AD_CLIENT_ID",
    "MSAL_CLIENT_ID",
];

pub const CLIENT_SECRET_KEYS: &[&str] = &[
    "MS_CLIENT_SECRET",
    "MICROSOFT_CLIENT_SECRET",
    "AZURE_AD_CLIENT_SECRET",
];

pub const TENANT_KEYS: &[&str] = &[
    "MS_TENANT_ID",
    "MICROSOFT_TENANT_ID",
    "MICROSOFT_TENANT",
    "AZURE_TENANT_ID",
    "AZURE_DIRECTORY_ID",
    "AZURE_AD_TENANT_ID",
    "MS_DIRECTORY_ID",
    "MS_TENANT",
    "NEXT_PUBLIC_MS_TENANT_ID",
    "NEXT_PUBLIC_MICROSOFT_TENANT_ID",
];

pub const SCOPE_KEYS: &[&str] = &["MS_SCOPES", "MICROSOFT_SCOPES"];

pub const ALLOWED_IDENTITY_KEYS: &[&str] =
    &["MS_ALLOWED_UPN", "MICROSOFT_ALLOWED_UPN", "MS_MAILBOX_UPN"];

pub const ENCRYPTION_KEY_KEYS: &[&str] = &["TOKEN_ENCRYPTION_KEY"];

pub const PROD_REDIRECT_KEYS: &[&str] = &[
    "MS_REDIRECT_URI",
    "MICROSOFT_REDIRECT_URI",
    "MICROSOFT_REDIRECT_URL",
    "NEXT_PUBLIC_MICROSOFT_REDIRECT_URI",
    "NEXT_PUBLIC_MICROSOFT_REDIRECT_URL",
    "AZURE_AD_REDIRECT_URI",
    "AZURE_AD_REDIRECT_URL",
];

pub const DEV_REDIRECT_KEYS: &[&str] = &[
    "MS_DEV_REDIRECT_URI",
    "MICROSOFT_DEV_REDIRECT_URI",
    "MICROSOFT_DEV_REDIRECT_URL",
    "NEXT_PUBLIC_MICROSOFT_DEV_REDIRECT_URI",
    "NEXT_PUBLIC_MICROSOFT_DEV_REDIRECT_URL",
];

pub const PROMPT_KEYS: &[&str] = &["MICROSOFT_OAUTH_PROMPT"];

pub const LOGIN_HINT_KEYS: &[&str] = &["MICROSOFT_LOGIN_HINT"];

pub const ADMIN_TOKEN_KEYS: &[&str] = &["MAIL_CONNECTOR_ADMIN_TOKEN"];

/// Normalizes a raw value: trimmed, and `None` for blank or the literal
/// text `undefined` / `null`.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("undefined")
        || trimmed.eq_ignore_ascii_case("null")
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// Returns the first usable value among `keys`, with the key it came from.
pub fn pick_with_key<F>(keys: &[&'static str], lookup: F) -> Option<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .find_map(|key| lookup(*key).as_deref().and_then(normalize).map(|v| (*key, v)))
}

/// Returns the first usable value among `keys`.
pub fn pick<F>(keys: &[&'static str], lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    pick_with_key(keys, lookup).map(|(_, value)| value)
}

/// Describes an alias group for error messages: `A (or B, C)`.
pub fn describe_keys(keys: &[&str]) -> String {
    match keys {
        [] => String::new(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (or {})", first, rest.join(", ")),
    }
}

/// Lookup closure over the real process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
