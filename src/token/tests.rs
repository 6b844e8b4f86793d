use super::*;
use crate::test_support::{
    identity_client, identity_client_with_timeout, seeded_token_set, test_cipher, FixedClock,
};
use futures::future::join_all;
use mockito::Matcher;
use std::io::Write;
use std::time::Duration;

const TOKEN_PATH: &str = "/common/oauth2/v2.0/token";
const OBTAINED_AT: i64 = 1_700_000_000_000;
const LIFETIME_SECONDS: u64 = 3600;

/// Milliseconds at which the seeded token enters the safety margin.
const REFRESH_POINT: i64 = OBTAINED_AT + (LIFETIME_SECONDS as i64) * 1000 - SAFETY_MARGIN_MS;

const ROTATED: &str = r#"{"access_token":"new-at","refresh_token":"new-rt","expires_in":3600}"#;

struct Fixture {
    provider: AccessTokenProvider,
    store: Arc<CredentialStore>,
    clock: Arc<FixedClock>,
}

fn fixture(server: &mockito::ServerGuard, seeded: bool) -> Fixture {
    fixture_with_client(identity_client(&server.url()), seeded)
}

fn fixture_with_client(client: IdentityClient, seeded: bool) -> Fixture {
    let store = Arc::new(CredentialStore::new(":memory:").unwrap());
    if seeded {
        let token_set =
            seeded_token_set(&test_cipher(), "cached-at", "old-rt", OBTAINED_AT, LIFETIME_SECONDS);
        store.save(&token_set).unwrap();
    }

    let clock = Arc::new(FixedClock::new(OBTAINED_AT));
    let provider = AccessTokenProvider::new(
        Arc::clone(&store),
        test_cipher(),
        client,
        clock.clone(),
    );

    Fixture {
        provider,
        store,
        clock,
    }
}

async fn mock_refresh(server: &mut mockito::ServerGuard, body: &str, hits: usize) -> mockito::Mock {
    server
        .mock("POST", TOKEN_PATH)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "old-rt".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

/// Refresh mock that holds the response body back for `delay`.
async fn mock_slow_refresh(
    server: &mut mockito::ServerGuard,
    delay: Duration,
    hits: usize,
) -> mockito::Mock {
    server
        .mock("POST", TOKEN_PATH)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "old-rt".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_chunked_body(move |w| {
            std::thread::sleep(delay);
            w.write_all(ROTATED.as_bytes())
        })
        .expect(hits)
        .create_async()
        .await
}

#[test]
fn test_token_state_boundaries() {
    let set = seeded_token_set(&test_cipher(), "at", "rt", OBTAINED_AT, LIFETIME_SECONDS);

    assert_eq!(TokenState::of(None, OBTAINED_AT), TokenState::NoCredential);
    assert_eq!(TokenState::of(Some(&set), OBTAINED_AT), TokenState::Valid);
    assert_eq!(TokenState::of(Some(&set), REFRESH_POINT - 1), TokenState::Valid);
    assert_eq!(TokenState::of(Some(&set), REFRESH_POINT), TokenState::NearExpiry);
    assert_eq!(
        TokenState::of(Some(&set), OBTAINED_AT + 10 * 3_600_000),
        TokenState::NearExpiry
    );
}

#[tokio::test]
async fn test_not_connected_without_credential() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("POST", TOKEN_PATH).expect(0).create_async().await;

    let fx = fixture(&server, false);
    assert_eq!(fx.provider.access_token().await, Err(ConnectorError::NotConnected));

    token.assert_async().await;
}

#[tokio::test]
async fn test_valid_token_served_without_network() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("POST", TOKEN_PATH).expect(0).create_async().await;

    let fx = fixture(&server, true);
    fx.clock.set(REFRESH_POINT - 1_000);

    assert_eq!(fx.provider.access_token().await.unwrap(), "cached-at");
    assert_eq!(fx.provider.access_token().await.unwrap(), "cached-at");

    token.assert_async().await;
}

#[tokio::test]
async fn test_near_expiry_refreshes_once() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_refresh(&mut server, ROTATED, 1).await;

    let fx = fixture(&server, true);
    fx.clock.set(REFRESH_POINT + 1_000);

    assert_eq!(fx.provider.access_token().await.unwrap(), "new-at");

    let stored = fx.store.load().unwrap().unwrap();
    let cipher = test_cipher();
    assert_eq!(cipher.decrypt(&stored.access_token_encrypted).unwrap(), "new-at");
    assert_eq!(cipher.decrypt(&stored.refresh_token_encrypted).unwrap(), "new-rt");
    assert_eq!(stored.obtained_at_epoch_millis, REFRESH_POINT + 1_000);
    assert_eq!(stored.expires_in_seconds, 3600);
    assert_eq!(stored.account_identity, "info@aktonz.example");

    // The refreshed token is now served from the store
    assert_eq!(fx.provider.access_token().await.unwrap(), "new-at");

    token.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_refresh(&mut server, ROTATED, 1).await;

    let fx = fixture(&server, true);
    fx.clock.set(REFRESH_POINT + 1_000);

    let results = join_all((0..10).map(|_| fx.provider.access_token())).await;
    for result in results {
        assert_eq!(result.unwrap(), "new-at");
    }

    token.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_one_refresh() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_refresh(&mut server, ROTATED, 1).await;

    let fx = fixture(&server, true);
    fx.clock.set(REFRESH_POINT + 1_000);
    let provider = Arc::new(fx.provider);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.access_token().await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "new-at");
    }

    token.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_survives_cancelled_caller() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_slow_refresh(&mut server, Duration::from_millis(300), 1).await;

    let fx = fixture(&server, true);
    fx.clock.set(REFRESH_POINT + 1_000);

    // The only caller gives up while the token endpoint is still answering
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), fx.provider.access_token()).await;
    assert!(abandoned.is_err());

    let cipher = test_cipher();
    let mut rotated = false;
    for _ in 0..100 {
        let stored = fx.store.load().unwrap().unwrap();
        if cipher.decrypt(&stored.refresh_token_encrypted).unwrap() == "new-rt" {
            rotated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(rotated, "rotated refresh token was never saved");

    // Served from the store; the consumed refresh token is not sent again
    assert_eq!(fx.provider.access_token().await.unwrap(), "new-at");

    token.assert_async().await;
}

#[tokio::test]
async fn test_unrotated_refresh_token_is_kept() {
    let mut server = mockito::Server::new_async().await;
    mock_refresh(&mut server, r#"{"access_token":"new-at","expires_in":1800}"#, 1).await;

    let fx = fixture(&server, true);
    fx.clock.set(REFRESH_POINT);

    assert_eq!(fx.provider.access_token().await.unwrap(), "new-at");

    let stored = fx.store.load().unwrap().unwrap();
    assert_eq!(
        test_cipher().decrypt(&stored.refresh_token_encrypted).unwrap(),
        "old-rt"
    );
    assert_eq!(stored.expires_in_seconds, 1800);
}

#[tokio::test]
async fn test_revoked_refresh_token_clears_store() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", TOKEN_PATH)
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant","error_description":"AADSTS700082: expired"}"#)
        .expect(1)
        .create_async()
        .await;

    let fx = fixture(&server, true);
    fx.clock.set(REFRESH_POINT + 1_000);

    assert_eq!(fx.provider.access_token().await, Err(ConnectorError::NotConnected));
    assert!(fx.store.load().unwrap().is_none());

    // Nothing left to refresh
    assert_eq!(fx.provider.access_token().await, Err(ConnectorError::NotConnected));
    assert!(!fx.provider.status().unwrap().connected);

    token.assert_async().await;
}

#[tokio::test]
async fn test_transport_failure_keeps_store() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", TOKEN_PATH)
        .with_status(503)
        .with_body("service unavailable")
        .expect(2)
        .create_async()
        .await;

    let fx = fixture(&server, true);
    let before = fx.store.load().unwrap();
    fx.clock.set(REFRESH_POINT + 1_000);

    let err = fx.provider.access_token().await.unwrap_err();
    assert!(matches!(err, ConnectorError::RefreshFailed(_)));
    assert!(err.is_retryable());
    assert_eq!(fx.store.load().unwrap(), before);

    // A later call tries again rather than reusing the failed attempt
    assert!(matches!(
        fx.provider.access_token().await,
        Err(ConnectorError::RefreshFailed(_))
    ));
}

#[tokio::test]
async fn test_rejected_client_keeps_store() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", TOKEN_PATH)
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret"}"#)
        .expect(1)
        .create_async()
        .await;

    let fx = fixture(&server, true);
    let before = fx.store.load().unwrap();
    fx.clock.set(REFRESH_POINT + 1_000);

    assert!(matches!(
        fx.provider.access_token().await,
        Err(ConnectorError::Configuration(_))
    ));
    assert_eq!(fx.store.load().unwrap(), before);
    assert!(fx.provider.status().unwrap().connected);

    token.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_token_endpoint_times_out() {
    let mut server = mockito::Server::new_async().await;
    mock_slow_refresh(&mut server, Duration::from_secs(1), 1).await;

    let fx = fixture_with_client(
        identity_client_with_timeout(&server.url(), Duration::from_millis(200)),
        true,
    );
    let before = fx.store.load().unwrap();
    fx.clock.set(REFRESH_POINT + 1_000);

    let err = fx.provider.access_token().await.unwrap_err();
    assert!(matches!(err, ConnectorError::RefreshFailed(_)), "got {:?}", err);
    assert_eq!(fx.store.load().unwrap(), before);
}

#[tokio::test]
async fn test_status_reports_remaining_lifetime() {
    let server = mockito::Server::new_async().await;
    let fx = fixture(&server, true);
    fx.clock.set(OBTAINED_AT + 600_400);

    let status = fx.provider.status().unwrap();
    assert!(status.connected);
    assert_eq!(status.expires_at, Some(OBTAINED_AT + 3_600_000));
    assert_eq!(status.expires_in_seconds, Some(3000));

    // Past expiry the remaining lifetime bottoms out at zero
    fx.clock.advance(10 * 3_600_000);
    assert_eq!(fx.provider.status().unwrap().expires_in_seconds, Some(0));
}

#[tokio::test]
async fn test_status_json_shape() {
    let server = mockito::Server::new_async().await;

    let fx = fixture(&server, false);
    let json = serde_json::to_value(fx.provider.status().unwrap()).unwrap();
    assert_eq!(json, serde_json::json!({ "connected": false }));

    let fx = fixture(&server, true);
    let json = serde_json::to_value(fx.provider.status().unwrap()).unwrap();
    assert_eq!(json["connected"], true);
    assert_eq!(json["expiresInSeconds"], 3600);
    assert!(json.get("expiresAt").is_some());
    assert!(json.get("account").is_none());
}

#[tokio::test]
async fn test_disconnect_removes_credential() {
    let server = mockito::Server::new_async().await;
    let fx = fixture(&server, true);

    assert!(fx.provider.disconnect().unwrap());
    assert!(fx.store.load().unwrap().is_none());
    assert!(!fx.provider.disconnect().unwrap());
    assert_eq!(fx.provider.access_token().await, Err(ConnectorError::NotConnected));
}
