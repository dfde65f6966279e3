#![allow(dead_code)]

use serde_json::{Value, json};
use spinshelf_server::{AppConfig, AppState, build_app};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ADMIN: &str = "owner@example.com";
pub const USER_ID: &str = "showcase-owner";

pub struct TestServer {
    pub base: String,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// Configuration pointing every upstream URL at `upstream`, with retry
/// pauses disabled.
pub fn config_for(upstream: &MockServer) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.spotify.api_base_url = format!("{}/v1", upstream.uri());
    cfg.spotify.token_url = format!("{}/api/token", upstream.uri());
    cfg.spotify.client_id = "client-id".into();
    cfg.spotify.client_secret = "client-secret".into();
    cfg.spotify.refresh_token = "refresh-token".into();
    cfg.spotify.user_id = USER_ID.into();
    cfg.fetch.transport_backoff_ms = 0;
    cfg.fetch.inter_chunk_delay_ms = 0;
    cfg.admin.identity = ADMIN.into();
    cfg
}

pub async fn start_server(cfg: &AppConfig) -> TestServer {
    let state = AppState::from_config(cfg).expect("app state");
    let app = build_app(state, cfg);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

pub async fn mount_token(upstream: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(upstream)
        .await;
}

pub fn track(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Track {id}"),
        "duration_ms": 200000,
        "artists": [{"id": format!("artist-{id}"), "name": "Someone"}],
        "album": {"id": "album", "name": "Album", "images": []},
        "external_urls": {"spotify": format!("https://open.spotify.com/track/{id}")}
    })
}

pub fn artist(id: &str, genres: &[&str]) -> Value {
    json!({ "id": id, "name": format!("Artist {id}"), "genres": genres })
}

pub fn playlist(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "tracks": {"total": 2},
        "external_urls": {"spotify": format!("https://open.spotify.com/playlist/{id}")}
    })
}
