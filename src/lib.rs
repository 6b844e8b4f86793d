// Error taxonomy
pub mod error;

// Environment and file configuration
pub mod config;

// Token encryption and the shared credential record
pub mod credentials;

// Authorization-code flow, redirect resolution, provider calls
pub mod oauth;

// Access tokens with single-flight refresh
pub mod token;

// Send-mail dispatch
pub mod mail;

// Admin bearer token
pub mod auth;

// HTTP endpoints
pub mod api;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ConnectorError, Result};
