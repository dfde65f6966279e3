use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spinshelf_spotify::{TokenCache, TokenCacheConfig, UpstreamError};
use url::Url;
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token_config(server: &MockServer, ttl: Duration) -> TokenCacheConfig {
    TokenCacheConfig {
        token_url: Url::parse(&format!("{}/api/token", server.uri())).unwrap(),
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        refresh_token: "refresh-token".into(),
        ttl,
    }
}

fn granted(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": 3600
    }))
}

#[tokio::test]
async fn credential_is_memoized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-token"))
        .respond_with(granted("tok-1"))
        .expect(1)
        .mount(&server)
        .await;

    let cache = TokenCache::new(reqwest::Client::new(), token_config(&server, Duration::from_secs(3000)));
    let first = cache.get_access_token().await.unwrap();
    let second = cache.get_access_token().await.unwrap();

    assert_eq!(first.value(), "tok-1");
    assert_eq!(second.value(), "tok-1");
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn fresh_credential_bypasses_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(granted("tok-1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(granted("tok-2"))
        .mount(&server)
        .await;

    let cache = TokenCache::new(reqwest::Client::new(), token_config(&server, Duration::from_secs(3000)));
    assert_eq!(cache.get_access_token().await.unwrap().value(), "tok-1");
    assert_eq!(cache.get_fresh_access_token().await.unwrap().value(), "tok-2");
    // The fresh credential replaces the cached one.
    assert_eq!(cache.get_access_token().await.unwrap().value(), "tok-2");
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(granted("shared").set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(TokenCache::new(
        reqwest::Client::new(),
        token_config(&server, Duration::from_secs(3000)),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_access_token().await })
        })
        .collect();

    for handle in handles {
        let cred = handle.await.unwrap().unwrap();
        assert_eq!(cred.value(), "shared");
    }
}

#[tokio::test]
async fn expired_credential_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(granted("tok"))
        .expect(2)
        .mount(&server)
        .await;

    // A zero TTL makes every credential expire on arrival.
    let cache = TokenCache::new(reqwest::Client::new(), token_config(&server, Duration::ZERO));
    cache.get_access_token().await.unwrap();
    cache.get_access_token().await.unwrap();
}

#[tokio::test]
async fn failed_refresh_never_serves_stale_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(granted("tok-1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Refresh token revoked"
        })))
        .mount(&server)
        .await;

    let cache = TokenCache::new(reqwest::Client::new(), token_config(&server, Duration::ZERO));
    assert_eq!(cache.get_access_token().await.unwrap().value(), "tok-1");

    let err = cache.get_access_token().await.unwrap_err();
    match err {
        UpstreamError::Auth { message } => assert!(message.contains("invalid_grant")),
        other => panic!("expected auth error, got {other:?}"),
    }
    assert!(cache.current().is_none());
}

#[tokio::test]
async fn invalidate_forces_new_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(granted("tok"))
        .expect(2)
        .mount(&server)
        .await;

    let cache = TokenCache::new(reqwest::Client::new(), token_config(&server, Duration::from_secs(3000)));
    cache.get_access_token().await.unwrap();
    cache.invalidate();
    assert!(cache.current().is_none());
    cache.get_access_token().await.unwrap();
}
