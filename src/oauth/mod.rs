//! OAuth 2.0 authorization-code flow for the mailbox connection.
//!
//! 1. Admin opens the connect endpoint → redirect to the identity provider
//! 2. Admin signs in as the allow-listed mailbox
//! 3. Provider redirects to the callback with `?code=...&state=...`
//! 4. Code is exchanged for tokens and the identity is verified
//! 5. Encrypted tokens are stored; the mailbox is "connected"

pub mod exchange;
pub mod flow;
pub mod provider;
pub mod redirect;
pub mod state_manager;

pub use exchange::{IdentityClient, Profile, RefreshFailure};
pub use flow::{AuthorizationFlow, ConnectedAccount};
pub use provider::ProviderEndpoints;
pub use redirect::{resolve_redirect_uri, RedirectContext, RedirectSettings, CALLBACK_PATH};
pub use state_manager::{run_state_cleanup, StateManager};
