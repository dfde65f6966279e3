use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{Router, extract::FromRef, middleware, routing::get};
use spinshelf_spotify::{
    BatchFetcher, RetryPolicy, SpotifyClient, TokenCache, TokenCacheConfig, build_http_client,
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use url::Url;

use crate::admin::{AdminIdentity, Revalidator, admin_routes};
use crate::api::api_routes;
use crate::cache::{TaggedCache, spawn_cleanup_task};
use crate::catalog::{CatalogSettings, MusicCatalog};
use crate::config::AppConfig;
use crate::history::RevalidationHistoryLog;
use crate::{handlers, middleware as app_middleware};

/// Shared services handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<MusicCatalog>,
    pub revalidator: Arc<Revalidator>,
    pub admin: AdminIdentity,
}

impl FromRef<AppState> for AdminIdentity {
    fn from_ref(state: &AppState) -> Self {
        state.admin.clone()
    }
}

impl AppState {
    /// Wires the upstream client, cache, history log and gateway from
    /// configuration. Nothing touches the network here.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let http = build_http_client(cfg.spotify.request_timeout())
            .context("failed to build upstream HTTP client")?;

        let tokens = Arc::new(TokenCache::new(
            http.clone(),
            TokenCacheConfig {
                token_url: Url::parse(&cfg.spotify.token_url)
                    .context("spotify.token_url is invalid")?,
                client_id: cfg.spotify.client_id.clone(),
                client_secret: cfg.spotify.client_secret.clone(),
                refresh_token: cfg.spotify.refresh_token.clone(),
                ttl: cfg.spotify.token_ttl(),
            },
        ));

        let retry = RetryPolicy::default()
            .with_max_attempts(cfg.fetch.max_retries)
            .with_transport_backoff(cfg.fetch.transport_backoff());
        let fetcher = BatchFetcher::new(retry).with_inter_chunk_delay(cfg.fetch.inter_chunk_delay());
        let api_base =
            Url::parse(&cfg.spotify.api_base_url).context("spotify.api_base_url is invalid")?;
        let client = Arc::new(
            SpotifyClient::new(http, api_base, Arc::clone(&tokens))
                .with_fetcher(fetcher)
                .with_batch_size(cfg.fetch.batch_size),
        );

        let cache = Arc::new(TaggedCache::new());
        let history = Arc::new(RevalidationHistoryLog::new(cfg.cache.history_capacity));

        if cfg.admin.identity.is_empty() {
            tracing::warn!("admin.identity is empty, admin endpoints are disabled");
        }
        if cfg.spotify.refresh_token.is_empty() {
            tracing::warn!("spotify.refresh_token is empty, upstream requests will fail");
        }

        Ok(Self {
            catalog: Arc::new(MusicCatalog::new(
                client,
                Arc::clone(&cache),
                CatalogSettings::from(cfg),
            )),
            revalidator: Arc::new(Revalidator::new(cache, history, tokens)),
            admin: AdminIdentity::new(&cfg.admin.identity),
        })
    }
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .merge(api_routes())
        .merge(admin_routes())
        .with_state(state)
        // ServiceBuilder runs top to bottom: the request id exists before the span is built
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<axum::body::Body>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<axum::http::HeaderValue>()
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("")
                                .to_string();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                                span.record("http.status_code", res.status().as_u16());
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new())
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        )
}

pub struct SpinshelfServer {
    addr: SocketAddr,
    app: Router,
    cache: Arc<TaggedCache>,
    cleanup_interval: Duration,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> anyhow::Result<SpinshelfServer> {
        let state = AppState::from_config(&self.config)?;
        let cache = Arc::clone(state.catalog.cache());
        let app = build_app(state, &self.config);

        Ok(SpinshelfServer {
            addr: self.addr,
            app,
            cache,
            cleanup_interval: self.config.cache.cleanup_interval(),
        })
    }
}

impl SpinshelfServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let cleanup = spawn_cleanup_task(self.cache, self.cleanup_interval);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        cleanup.abort();
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
