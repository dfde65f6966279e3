//! Read API used by the site's rendering layer.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use spinshelf_spotify::models::{Artist, CurrentlyPlaying, PlayHistory, Playlist, Track};

use crate::catalog::Lookup;
use crate::error::ApiError;
use crate::server::AppState;

/// Upper bound on IDs accepted by one lookup request.
pub const MAX_LOOKUP_IDS: usize = 500;

#[derive(Debug, Deserialize)]
pub struct IdsQuery {
    #[serde(default)]
    pub ids: Option<String>,
}

impl IdsQuery {
    fn parse(&self) -> Result<Vec<String>, ApiError> {
        let ids: Vec<String> = self
            .ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Err(ApiError::BadRequest("query parameter 'ids' is required".into()));
        }
        if ids.len() > MAX_LOOKUP_IDS {
            return Err(ApiError::BadRequest(format!(
                "at most {MAX_LOOKUP_IDS} ids per request"
            )));
        }
        Ok(ids)
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub count: usize,
    pub partial: bool,
}

impl<T> From<Lookup<T>> for ListResponse<T> {
    fn from(lookup: Lookup<T>) -> Self {
        Self {
            count: lookup.items.len(),
            items: lookup.items,
            partial: lookup.partial,
        }
    }
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
            partial: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemResponse<T> {
    pub item: Option<T>,
}

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/playlists", get(playlists))
        .route("/api/playlists/{id}", get(playlist))
        .route("/api/playlists/{id}/tracks", get(playlist_tracks))
        .route("/api/tracks", get(tracks))
        .route("/api/artists/genres", get(artist_genres))
        .route("/api/curated", get(curated))
        .route("/api/recently-played", get(recently_played))
        .route("/api/now-playing", get(now_playing))
}

async fn playlists(State(state): State<AppState>) -> Result<Json<ListResponse<Playlist>>, ApiError> {
    let items = state.catalog.playlists().await?;
    Ok(Json(items.into()))
}

async fn playlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Playlist>, ApiError> {
    Ok(Json(state.catalog.playlist(&id).await?))
}

async fn playlist_tracks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ListResponse<Track>>, ApiError> {
    let items = state.catalog.playlist_tracks(&id).await?;
    Ok(Json(items.into()))
}

async fn tracks(
    State(state): State<AppState>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<ListResponse<Track>>, ApiError> {
    let ids = query.parse()?;
    Ok(Json(state.catalog.tracks(&ids).await?.into()))
}

async fn artist_genres(
    State(state): State<AppState>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<ListResponse<Artist>>, ApiError> {
    let ids = query.parse()?;
    Ok(Json(state.catalog.artist_genres(&ids).await?.into()))
}

async fn curated(State(state): State<AppState>) -> Result<Json<ListResponse<Track>>, ApiError> {
    Ok(Json(state.catalog.curated_tracks().await?.into()))
}

async fn recently_played(
    State(state): State<AppState>,
) -> Result<Json<ItemResponse<PlayHistory>>, ApiError> {
    let item = state.catalog.recently_played().await?;
    Ok(Json(ItemResponse { item }))
}

async fn now_playing(
    State(state): State<AppState>,
) -> Result<Json<ItemResponse<CurrentlyPlaying>>, ApiError> {
    let item = state.catalog.now_playing().await?;
    Ok(Json(ItemResponse { item }))
}
