//! Callback URL resolution.
//!
//! The identity provider requires the `redirect_uri` sent with the authorize
//! redirect and the one sent with the code exchange to be byte-identical, so
//! both steps resolve it here from the same inputs: the configured overrides
//! and the inbound request's host headers.

use crate::config::env;
use crate::error::{ConnectorError, Result};
use axum::http::HeaderMap;
use reqwest::Url;
use std::net::IpAddr;

/// Path of the callback route on this service.
pub const CALLBACK_PATH: &str = "/api/mail/oauth/cb";

/// Configured redirect overrides plus the hard defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectSettings {
    /// First usable production override and the variable it came from
    pub production: Option<(&'static str, String)>,
    /// First usable local override and the variable it came from
    pub local: Option<(&'static str, String)>,
    /// Host used by the production default
    pub canonical_host: String,
    /// Port used by the local default
    pub local_port: u16,
}

impl RedirectSettings {
    /// Settings with no overrides configured.
    pub fn defaults(canonical_host: &str, local_port: u16) -> Self {
        Self {
            production: None,
            local: None,
            canonical_host: canonical_host.to_string(),
            local_port,
        }
    }

    pub fn default_production_uri(&self) -> String {
        format!("https://{}{}", self.canonical_host, CALLBACK_PATH)
    }

    pub fn default_local_uri(&self) -> String {
        format!("http://localhost:{}{}", self.local_port, CALLBACK_PATH)
    }

    /// Picks the raw value for the environment, with the key to blame if it
    /// turns out to be malformed.
    fn select(&self, is_local: bool) -> (&'static str, String) {
        if is_local {
            self.local
                .clone()
                .unwrap_or_else(|| (env::DEV_REDIRECT_KEYS[0], self.default_local_uri()))
        } else {
            self.production
                .clone()
                .unwrap_or_else(|| (env::PROD_REDIRECT_KEYS[0], self.default_production_uri()))
        }
    }
}

/// Per-request inputs to redirect resolution. Never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedirectContext {
    pub host_header: String,
    pub forwarded_host: Option<String>,
    pub forwarded_proto: Option<String>,
    pub is_local_environment: bool,
}

impl RedirectContext {
    pub fn new(
        host_header: &str,
        forwarded_host: Option<&str>,
        forwarded_proto: Option<&str>,
    ) -> Self {
        let forwarded_host = forwarded_host.and_then(first_header_value);
        let forwarded_proto = forwarded_proto.and_then(first_header_value);
        let host_header = host_header.trim().to_string();

        let effective = forwarded_host.as_deref().unwrap_or(&host_header);
        let is_local_environment = is_local_host(effective);

        Self {
            host_header,
            forwarded_host,
            forwarded_proto,
            is_local_environment,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self::new(
            header("host").unwrap_or_default(),
            header("x-forwarded-host"),
            header("x-forwarded-proto"),
        )
    }

    /// The host the client actually addressed; forwarded host wins.
    pub fn effective_host(&self) -> &str {
        self.forwarded_host.as_deref().unwrap_or(&self.host_header)
    }
}

/// First entry of a possibly comma-separated proxy header.
fn first_header_value(raw: &str) -> Option<String> {
    raw.split(',')
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Whether `host` (optionally with a port) names this machine.
pub fn is_local_host(host: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();

    let name = if let Some(rest) = host.strip_prefix('[') {
        // [::1]:3000
        rest.split(']').next().unwrap_or_default()
    } else if host.matches(':').count() > 1 {
        // bare IPv6 literal
        host.as_str()
    } else {
        host.split(':').next().unwrap_or_default()
    };

    if name == "localhost" || name.ends_with(".localhost") {
        return true;
    }

    name.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Resolves the absolute callback URL for this request.
pub fn resolve_redirect_uri(settings: &RedirectSettings, ctx: &RedirectContext) -> Result<String> {
    let (key, raw) = settings.select(ctx.is_local_environment);
    ensure_absolute(&raw, key, ctx)
}

fn ensure_absolute(raw: &str, key: &str, ctx: &RedirectContext) -> Result<String> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| ConnectorError::InvalidRedirectConfiguration {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if let Ok(url) = Url::parse(trimmed) {
        if url.host_str().map_or(false, |h| !h.is_empty()) {
            return Ok(trimmed.to_string());
        }
        return Err(invalid("must be a valid absolute URL"));
    }

    if !trimmed.starts_with('/') || trimmed.starts_with("//") {
        return Err(invalid("must be a valid absolute URL"));
    }

    let host: String = ctx
        .effective_host()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let host = host.trim_end_matches('/');
    if host.is_empty() {
        return Err(invalid(
            "must be an absolute URL or the request must include a valid Host header",
        ));
    }

    let scheme = match ctx.forwarded_proto.as_deref().map(str::to_ascii_lowercase) {
        Some(proto) if proto == "http" || proto == "https" => proto,
        _ if ctx.is_local_environment => "http".to_string(),
        _ => "https".to_string(),
    };

    let absolute = format!("{}://{}{}", scheme, host, trimmed);
    match Url::parse(&absolute) {
        Ok(url) if url.host_str().is_some() => Ok(absolute),
        _ => Err(invalid("could not be combined with the request host into a valid URL")),
    }
}
