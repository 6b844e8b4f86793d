use anyhow::{Context, Result};
use mail_connector::api::{create_mail_router, MailAppState};
use mail_connector::config::{load_config, ConnectorConfig, FileConfig};
use mail_connector::credentials::{CredentialStore, TokenCipher};
use mail_connector::mail::MailDispatcher;
use mail_connector::oauth::{
    run_state_cleanup, AuthorizationFlow, IdentityClient, ProviderEndpoints, StateManager,
};
use mail_connector::token::{AccessTokenProvider, Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// CSRF states live for 10 minutes
const STATE_EXPIRY_SECONDS: i64 = 600;
const STATE_CLEANUP_INTERVAL_SECONDS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mail_connector=info".into()),
        )
        .init();

    info!("Mail connector starting...");

    let file_config = match std::env::var("MAIL_CONNECTOR_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => FileConfig::default(),
    };

    let config = ConnectorConfig::from_env(&file_config.redirect)
        .context("Failed to load mail connector settings")?;

    info!(
        port = file_config.server.port,
        store = %file_config.store.path,
        tenant = %config.oauth.tenant,
        mailbox = %config.oauth.allowed_identity,
        admin_auth = config.admin_token.is_some(),
        "Configuration loaded"
    );

    let cipher = TokenCipher::from_base64(&config.encryption_key)
        .context("TOKEN_ENCRYPTION_KEY must be base64 of exactly 32 bytes")?;

    let store = Arc::new(
        CredentialStore::new(&file_config.store.path)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let timeout = Duration::from_secs(file_config.http.timeout_seconds);
    let endpoints = ProviderEndpoints::new(&file_config.provider, &config.oauth.tenant);
    let client = IdentityClient::new(endpoints.clone(), config.oauth.clone(), timeout)
        .context("Failed to build identity provider client")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let flow = Arc::new(AuthorizationFlow::new(
        client.clone(),
        cipher.clone(),
        Arc::clone(&store),
        Arc::clone(&clock),
    ));
    let tokens = Arc::new(AccessTokenProvider::new(
        Arc::clone(&store),
        cipher,
        client,
        clock,
    ));
    let dispatcher = Arc::new(
        MailDispatcher::new(
            Arc::clone(&tokens),
            &endpoints,
            &config.oauth.allowed_identity,
            timeout,
        )
        .context("Failed to build mail dispatcher")?,
    );

    let state_manager = StateManager::new(STATE_EXPIRY_SECONDS);
    tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        STATE_CLEANUP_INTERVAL_SECONDS,
    ));

    let router = create_mail_router(MailAppState {
        flow,
        tokens,
        dispatcher,
        state_manager,
        redirect: config.redirect,
        admin_token: config.admin_token,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", file_config.server.port))
        .await
        .context("Failed to bind mail connector port")?;
    info!(port = file_config.server.port, "Mail connector listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Mail connector server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Mail connector stopped");

    Ok(())
}
