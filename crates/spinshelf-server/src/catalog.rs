//! Cached fetch operations exposed to collaborators.
//!
//! | operation | key | tags | ttl |
//! |-----------|-----|------|-----|
//! | `playlists` | `playlists:user:<uid>` | `playlists`, `user-playlists:<uid>` | default |
//! | `playlist` | `playlist:<id>` | `playlists`, `playlist:<id>` | default |
//! | `playlist_tracks` | `playlist-tracks:<id>` | `playlists`, `tracks`, `playlist:<id>` | default |
//! | `tracks` | `track:<id>` | `tracks`, `track:<id>` | default |
//! | `artist_genres` | `artist-genres:<id>` | `artist-genres`, `artist:<id>` | genres |
//! | `curated_tracks` | `curated-tracks` | `curated-tracks`, `tracks` | default |
//! | `recently_played` | `recently-played` | `recently-played` | recently played |
//! | `now_playing` | not cached | | |

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use spinshelf_spotify::models::{Artist, CurrentlyPlaying, PlayHistory, Playlist, Track};
use spinshelf_spotify::{BatchResult, SpotifyClient, UpstreamError};

use crate::cache::{CacheTag, CacheTags, TaggedCache};
use crate::config::AppConfig;

/// Catalog settings derived from configuration.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub user_id: String,
    pub curated_track_ids: Vec<String>,
    pub default_ttl: Duration,
    pub artist_genres_ttl: Duration,
    pub recently_played_ttl: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            curated_track_ids: Vec::new(),
            default_ttl: Duration::from_secs(3600),
            artist_genres_ttl: Duration::from_secs(24 * 3600),
            recently_played_ttl: Duration::from_secs(60),
        }
    }
}

impl From<&AppConfig> for CatalogSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            user_id: cfg.spotify.user_id.clone(),
            curated_track_ids: cfg.curated.track_ids.clone(),
            default_ttl: Duration::from_secs(cfg.cache.default_ttl_secs),
            artist_genres_ttl: Duration::from_secs(cfg.cache.artist_genres_ttl_secs),
            recently_played_ttl: Duration::from_secs(cfg.cache.recently_played_ttl_secs),
        }
    }
}

/// Result of a per-ID lookup. `partial` is set when some upstream chunk
/// failed; missing entities are simply absent.
#[derive(Debug, Clone, Serialize)]
pub struct Lookup<T> {
    pub items: Vec<T>,
    pub partial: bool,
}

/// Tagged, cached view over the upstream API.
pub struct MusicCatalog {
    client: Arc<SpotifyClient>,
    cache: Arc<TaggedCache>,
    settings: CatalogSettings,
}

impl MusicCatalog {
    pub fn new(client: Arc<SpotifyClient>, cache: Arc<TaggedCache>, settings: CatalogSettings) -> Self {
        Self {
            client,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<TaggedCache> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<SpotifyClient> {
        &self.client
    }

    /// Playlists of the configured account.
    pub async fn playlists(&self) -> Result<Vec<Playlist>, UpstreamError> {
        let user_id = &self.settings.user_id;
        if user_id.is_empty() {
            return Err(UpstreamError::BadRequest("spotify.user_id is not configured".into()));
        }
        let key = format!("playlists:user:{user_id}");
        let tags = CacheTags::new(CacheTag::Playlists).with(CacheTag::user_playlists(user_id));
        self.cached(&key, &tags, self.settings.default_ttl, || {
            self.client.user_playlists(user_id)
        })
        .await
    }

    pub async fn playlist(&self, playlist_id: &str) -> Result<Playlist, UpstreamError> {
        let key = format!("playlist:{playlist_id}");
        let tags = CacheTags::new(CacheTag::Playlists).with(CacheTag::playlist(playlist_id));
        self.cached(&key, &tags, self.settings.default_ttl, || {
            self.client.playlist(playlist_id)
        })
        .await
    }

    pub async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>, UpstreamError> {
        let key = format!("playlist-tracks:{playlist_id}");
        let tags = CacheTags::new(CacheTag::Playlists)
            .with(CacheTag::Tracks)
            .with(CacheTag::playlist(playlist_id));
        self.cached(&key, &tags, self.settings.default_ttl, || {
            self.client.playlist_tracks(playlist_id)
        })
        .await
    }

    /// Tracks by ID; only cache misses are fetched upstream.
    pub async fn tracks(&self, ids: &[String]) -> Result<Lookup<Track>, UpstreamError> {
        self.lookup(
            ids,
            |id| format!("track:{id}"),
            |id| CacheTags::new(CacheTag::Tracks).with(CacheTag::track(id)),
            self.settings.default_ttl,
            |t: &Track| t.id.clone(),
            |missing| async move { self.client.tracks(&missing).await },
        )
        .await
    }

    /// Artists (with genres) by ID; only cache misses are fetched upstream.
    pub async fn artist_genres(&self, ids: &[String]) -> Result<Lookup<Artist>, UpstreamError> {
        self.lookup(
            ids,
            |id| format!("artist-genres:{id}"),
            |id| CacheTags::new(CacheTag::ArtistGenres).with(CacheTag::artist(id)),
            self.settings.artist_genres_ttl,
            |a: &Artist| Some(a.id.clone()),
            |missing| async move { self.client.artists(&missing).await },
        )
        .await
    }

    /// The configured curated track list. Cached only when complete.
    pub async fn curated_tracks(&self) -> Result<Lookup<Track>, UpstreamError> {
        const KEY: &str = "curated-tracks";
        if let Some(items) = self.cache.get::<Vec<Track>>(KEY) {
            return Ok(Lookup {
                items,
                partial: false,
            });
        }

        let ids = dedup(&self.settings.curated_track_ids);
        if ids.is_empty() {
            return Ok(Lookup {
                items: Vec::new(),
                partial: false,
            });
        }

        let result = self.client.tracks(&ids).await?;
        let partial = result.is_partial();
        let items = result.into_items();
        if partial {
            tracing::warn!(fetched = items.len(), requested = ids.len(), "curated list incomplete, not cached");
        } else {
            let tags = CacheTags::new(CacheTag::CuratedTracks).with(CacheTag::Tracks);
            self.store(KEY, &items, &tags, self.settings.default_ttl);
        }
        Ok(Lookup { items, partial })
    }

    pub async fn recently_played(&self) -> Result<Option<PlayHistory>, UpstreamError> {
        let tags = CacheTags::new(CacheTag::RecentlyPlayed);
        self.cached("recently-played", &tags, self.settings.recently_played_ttl, || {
            self.client.recently_played()
        })
        .await
    }

    /// Live playback state; never cached.
    pub async fn now_playing(&self) -> Result<Option<CurrentlyPlaying>, UpstreamError> {
        self.client.currently_playing().await
    }

    async fn cached<T, F, Fut>(
        &self,
        key: &str,
        tags: &CacheTags,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, UpstreamError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        if let Some(value) = self.cache.get::<T>(key) {
            tracing::debug!(key = %key, "cache hit");
            return Ok(value);
        }
        let value = fetch().await?;
        self.store(key, &value, tags, ttl);
        Ok(value)
    }

    async fn lookup<T, K, G, I, F, Fut>(
        &self,
        ids: &[String],
        key_for: K,
        tags_for: G,
        ttl: Duration,
        id_of: I,
        fetch_missing: F,
    ) -> Result<Lookup<T>, UpstreamError>
    where
        T: Serialize + DeserializeOwned + Clone,
        K: Fn(&str) -> String,
        G: Fn(&str) -> CacheTags,
        I: Fn(&T) -> Option<String>,
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<BatchResult<T>, UpstreamError>>,
    {
        let ids = dedup(ids);
        let mut found: HashMap<String, T> = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();

        for id in &ids {
            match self.cache.get::<T>(&key_for(id)) {
                Some(item) => {
                    found.insert(id.clone(), item);
                }
                None => missing.push(id.clone()),
            }
        }

        let mut partial = false;
        if !missing.is_empty() {
            tracing::debug!(hits = found.len(), misses = missing.len(), "fetching missing entities");
            let result = fetch_missing(missing).await?;
            partial = result.is_partial();
            for item in result.into_items() {
                let Some(id) = id_of(&item) else { continue };
                self.store(&key_for(&id), &item, &tags_for(&id), ttl);
                found.insert(id, item);
            }
        }

        let items = ids.iter().filter_map(|id| found.get(id).cloned()).collect();
        Ok(Lookup { items, partial })
    }

    fn store<T: Serialize>(&self, key: &str, value: &T, tags: &CacheTags, ttl: Duration) {
        if let Err(e) = self.cache.set(key, value, tags, Some(ttl)) {
            tracing::warn!(error = %e, "response not cached");
        }
    }
}

/// Drops blank and repeated IDs, keeping first-seen order.
fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_preserves_order() {
        let ids: Vec<String> = ["b", "a", " b ", "", "c", "a"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(dedup(&ids), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_settings_from_config() {
        let mut cfg = AppConfig::default();
        cfg.spotify.user_id = "owner".into();
        cfg.cache.recently_played_ttl_secs = 30;
        let settings = CatalogSettings::from(&cfg);
        assert_eq!(settings.user_id, "owner");
        assert_eq!(settings.recently_played_ttl, Duration::from_secs(30));
        assert_eq!(settings.artist_genres_ttl, Duration::from_secs(86_400));
    }
}
