//! Identity provider and mail API endpoints.

use crate::config::{OAuthSettings, ProviderConfig};

/// Endpoint URLs for one tenant of the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// OAuth authorization endpoint URL
    pub authorize_url: String,
    /// OAuth token endpoint URL
    pub token_url: String,
    /// Mail API base URL (profile lookup and send-mail)
    pub graph_url: String,
}

impl ProviderEndpoints {
    pub fn new(provider: &ProviderConfig, tenant: &str) -> Self {
        let authority = provider.authority_url.trim_end_matches('/');
        let tenant = urlencoding::encode(tenant);
        Self {
            authorize_url: format!("{}/{}/oauth2/v2.0/authorize", authority, tenant),
            token_url: format!("{}/{}/oauth2/v2.0/token", authority, tenant),
            graph_url: provider.graph_url.trim_end_matches('/').to_string(),
        }
    }

    /// Profile of the signed-in identity.
    pub fn profile_url(&self) -> String {
        format!(
            "{}/me?$select=displayName,userPrincipalName,mail",
            self.graph_url
        )
    }

    /// Send-mail operation on behalf of `identity`.
    pub fn send_mail_url(&self, identity: &str) -> String {
        format!(
            "{}/users/{}/sendMail",
            self.graph_url,
            urlencoding::encode(identity)
        )
    }

    /// Build authorization URL with state and redirect_uri
    pub fn build_authorize_url(
        &self,
        settings: &OAuthSettings,
        state: &str,
        redirect_uri: &str,
    ) -> String {
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&response_mode=query&state={}&prompt={}",
            self.authorize_url,
            urlencoding::encode(&settings.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&settings.scopes),
            urlencoding::encode(state),
            urlencoding::encode(&settings.prompt),
        );

        if let Some(hint) = &settings.login_hint {
            url.push_str("&login_hint=");
            url.push_str(&urlencoding::encode(hint));
        }

        url
    }
}
