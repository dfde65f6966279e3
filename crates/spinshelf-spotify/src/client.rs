//! Typed Spotify Web API client.
//!
//! Every request carries a bearer credential from the shared
//! [`TokenCache`]. A 401 triggers exactly one forced refresh and replay;
//! everything else is classified into [`UpstreamError`] and handed to the
//! retry machinery.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use serde::de::DeserializeOwned;
use url::Url;

use crate::batch::{BatchFetcher, BatchResult, MAX_BATCH_SIZE};
use crate::error::UpstreamError;
use crate::models::{
    ApiErrorBody, Artist, ArtistsResponse, CurrentlyPlaying, Paging, PlayHistory, Playlist,
    PlaylistItem, RecentlyPlayed, Track, TracksResponse,
};
use crate::token::TokenCache;

/// Used when a 429 arrives without a parseable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Upper bound on pages followed by one paginated listing.
pub const MAX_PAGES: usize = 20;

const PLAYLISTS_PAGE_SIZE: &str = "50";
const PLAYLIST_TRACKS_PAGE_SIZE: &str = "100";

/// Builds the shared HTTP client.
///
/// # Errors
///
/// Returns [`UpstreamError::Transport`] if the TLS backend cannot be
/// initialised.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, UpstreamError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("spinshelf/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| UpstreamError::Transport(format!("failed to build HTTP client: {e}")))
}

/// Returns `true` for 22-character base62 Spotify IDs.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 22 && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Spotify Web API client.
pub struct SpotifyClient {
    http: reqwest::Client,
    api_base: Url,
    tokens: Arc<TokenCache>,
    fetcher: BatchFetcher,
    batch_size: usize,
}

impl SpotifyClient {
    /// Creates a client for `api_base` (e.g. `https://api.spotify.com/v1`).
    #[must_use]
    pub fn new(http: reqwest::Client, api_base: Url, tokens: Arc<TokenCache>) -> Self {
        Self {
            http,
            api_base,
            tokens,
            fetcher: BatchFetcher::default(),
            batch_size: MAX_BATCH_SIZE,
        }
    }

    /// Replaces the batch fetcher (retry policy and pacing).
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: BatchFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Sets the lookup batch size, clamped to `1..=MAX_BATCH_SIZE`.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// The shared credential cache.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    // ---- Endpoints ----

    /// All playlists of `user_id`, following pagination.
    pub async fn user_playlists(&self, user_id: &str) -> Result<Vec<Playlist>, UpstreamError> {
        if user_id.is_empty() {
            return Err(UpstreamError::BadRequest("user id must not be empty".into()));
        }
        let mut url = self.endpoint(&["users", user_id, "playlists"])?;
        url.query_pairs_mut().append_pair("limit", PLAYLISTS_PAGE_SIZE);
        self.paginate(url).await
    }

    /// Playlist metadata.
    pub async fn playlist(&self, playlist_id: &str) -> Result<Playlist, UpstreamError> {
        validate_playlist_id(playlist_id)?;
        let url = self.endpoint(&["playlists", playlist_id])?;
        self.get_json_with_retry(&url).await
    }

    /// All tracks of a playlist, skipping unavailable entries.
    pub async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>, UpstreamError> {
        validate_playlist_id(playlist_id)?;
        let mut url = self.endpoint(&["playlists", playlist_id, "tracks"])?;
        url.query_pairs_mut()
            .append_pair("limit", PLAYLIST_TRACKS_PAGE_SIZE);
        let items: Vec<PlaylistItem> = self.paginate(url).await?;
        Ok(items.into_iter().filter_map(|item| item.track).collect())
    }

    /// Batched track lookup. Malformed IDs fail the call before any request.
    pub async fn tracks(&self, ids: &[String]) -> Result<BatchResult<Track>, UpstreamError> {
        validate_lookup_ids("track", ids)?;
        let max_attempts = self.fetcher.retry_policy().max_attempts;
        self.fetcher
            .fetch_batched(ids, self.batch_size, max_attempts, |chunk| {
                let url = self.lookup_url("tracks", &chunk);
                async move {
                    let resp: TracksResponse = self.get_json(&url?).await?;
                    Ok::<_, UpstreamError>(resp.tracks.into_iter().flatten().collect())
                }
            })
            .await
    }

    /// Batched artist lookup (genres).
    pub async fn artists(&self, ids: &[String]) -> Result<BatchResult<Artist>, UpstreamError> {
        validate_lookup_ids("artist", ids)?;
        let max_attempts = self.fetcher.retry_policy().max_attempts;
        self.fetcher
            .fetch_batched(ids, self.batch_size, max_attempts, |chunk| {
                let url = self.lookup_url("artists", &chunk);
                async move {
                    let resp: ArtistsResponse = self.get_json(&url?).await?;
                    Ok::<_, UpstreamError>(resp.artists.into_iter().flatten().collect())
                }
            })
            .await
    }

    /// The most recently played track, if any.
    pub async fn recently_played(&self) -> Result<Option<PlayHistory>, UpstreamError> {
        let mut url = self.endpoint(&["me", "player", "recently-played"])?;
        url.query_pairs_mut().append_pair("limit", "1");
        let resp: RecentlyPlayed = self.get_json_with_retry(&url).await?;
        Ok(resp.items.into_iter().next())
    }

    /// What is playing right now. `None` when nothing is (204).
    pub async fn currently_playing(&self) -> Result<Option<CurrentlyPlaying>, UpstreamError> {
        let url = self.endpoint(&["me", "player", "currently-playing"])?;
        let url = &url;
        let policy = self.fetcher.retry_policy();
        policy
            .run(|| async move {
                let response = self.authorized_get(url).await?;
                if response.status() == StatusCode::NO_CONTENT {
                    return Ok(None);
                }
                response
                    .json::<CurrentlyPlaying>()
                    .await
                    .map(Some)
                    .map_err(|e| UpstreamError::Decode(e.to_string()))
            })
            .await
    }

    // ---- Plumbing ----

    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| UpstreamError::BadRequest("API base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn lookup_url(&self, resource: &str, ids: &[String]) -> Result<Url, UpstreamError> {
        let mut url = self.endpoint(&[resource])?;
        url.query_pairs_mut().append_pair("ids", &ids.join(","));
        Ok(url)
    }

    async fn paginate<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>, UpstreamError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= MAX_PAGES {
                tracing::warn!(pages, url = %url, "page limit reached, truncating listing");
                break;
            }
            let page: Paging<T> = self.get_json_with_retry(&url).await?;
            pages += 1;
            items.extend(page.items);
            next = page
                .next
                .map(|n| Url::parse(&n))
                .transpose()
                .map_err(|e| UpstreamError::Decode(format!("invalid next page URL: {e}")))?;
            if let Some(url) = next.as_ref().filter(|u| u.origin() != self.api_base.origin()) {
                tracing::warn!(url = %url, "next page URL leaves the API origin, not followed");
                next = None;
            }
        }

        tracing::debug!(pages, items = items.len(), "paginated listing fetched");
        Ok(items)
    }

    async fn get_json_with_retry<T: DeserializeOwned>(&self, url: &Url) -> Result<T, UpstreamError> {
        self.fetcher
            .retry_policy()
            .run(|| self.get_json(url))
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, UpstreamError> {
        let response = self.authorized_get(url).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    /// Performs an authenticated GET and classifies non-success statuses.
    async fn authorized_get(&self, url: &Url) -> Result<reqwest::Response, UpstreamError> {
        let credential = self.tokens.get_access_token().await?;
        let mut response = self.send(url, credential.value()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::info!(url = %url, "credential rejected, refreshing once");
            let fresh = self.tokens.get_fresh_access_token().await?;
            response = self.send(url, fresh.value()).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(UpstreamError::auth("credential rejected after refresh"));
            }
        }

        classify(response).await
    }

    async fn send(&self, url: &Url, token: &str) -> Result<reqwest::Response, UpstreamError> {
        self.http
            .get(url.clone())
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %url, error = %e, "upstream request failed");
                UpstreamError::Transport(e.to_string())
            })
    }
}

fn validate_playlist_id(id: &str) -> Result<(), UpstreamError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(UpstreamError::BadRequest(format!("malformed playlist id '{id}'")))
    }
}

/// Refuses the whole lookup when any ID is malformed.
fn validate_lookup_ids(kind: &str, ids: &[String]) -> Result<(), UpstreamError> {
    let invalid: Vec<&str> = ids
        .iter()
        .map(String::as_str)
        .filter(|id| !is_valid_id(id))
        .collect();
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(UpstreamError::BadRequest(format!(
            "malformed {kind} ids: {}",
            invalid.join(", ")
        )))
    }
}

async fn classify(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(UpstreamError::RateLimited { retry_after_secs });
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    tracing::debug!(status = status.as_u16(), url = %url, message = %message, "upstream error");

    Err(match status {
        StatusCode::NOT_FOUND => UpstreamError::NotFound(message),
        StatusCode::BAD_REQUEST => UpstreamError::BadRequest(message),
        _ => UpstreamError::unavailable(status.as_u16(), message),
    })
}
