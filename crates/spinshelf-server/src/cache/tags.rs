//! Cache tag vocabulary.
//!
//! Every cached fetch declares the tags it belongs to; invalidating a tag
//! drops every entry that declared it. The vocabulary is closed: six coarse
//! scopes plus entity-scoped sub-tags of the form `<kind>:<id>`.

use std::fmt;
use std::str::FromStr;

/// A named invalidation scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheTag {
    Playlists,
    Tracks,
    ArtistGenres,
    CuratedTracks,
    RecentlyPlayed,
    /// Not attached to cache entries; invalidating it drops the upstream
    /// access credential.
    SpotifyToken,
    Artist(String),
    Track(String),
    Playlist(String),
    UserPlaylists(String),
}

/// Error returned when parsing a string outside the tag vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache tag '{0}'")]
pub struct UnknownTag(pub String);

impl CacheTag {
    /// The coarse tags invalidated by a purge-all, in fixed order.
    pub fn purge_all_set() -> [CacheTag; 6] {
        [
            Self::Playlists,
            Self::Tracks,
            Self::ArtistGenres,
            Self::CuratedTracks,
            Self::RecentlyPlayed,
            Self::SpotifyToken,
        ]
    }

    pub fn artist(id: impl Into<String>) -> Self {
        Self::Artist(id.into())
    }

    pub fn track(id: impl Into<String>) -> Self {
        Self::Track(id.into())
    }

    pub fn playlist(id: impl Into<String>) -> Self {
        Self::Playlist(id.into())
    }

    pub fn user_playlists(user_id: impl Into<String>) -> Self {
        Self::UserPlaylists(user_id.into())
    }

    /// `true` for the six fixed scopes.
    pub fn is_coarse(&self) -> bool {
        matches!(
            self,
            Self::Playlists
                | Self::Tracks
                | Self::ArtistGenres
                | Self::CuratedTracks
                | Self::RecentlyPlayed
                | Self::SpotifyToken
        )
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playlists => f.write_str("playlists"),
            Self::Tracks => f.write_str("tracks"),
            Self::ArtistGenres => f.write_str("artist-genres"),
            Self::CuratedTracks => f.write_str("curated-tracks"),
            Self::RecentlyPlayed => f.write_str("recently-played"),
            Self::SpotifyToken => f.write_str("spotify-token"),
            Self::Artist(id) => write!(f, "artist:{id}"),
            Self::Track(id) => write!(f, "track:{id}"),
            Self::Playlist(id) => write!(f, "playlist:{id}"),
            Self::UserPlaylists(id) => write!(f, "user-playlists:{id}"),
        }
    }
}

impl FromStr for CacheTag {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = match s {
            "playlists" => Self::Playlists,
            "tracks" => Self::Tracks,
            "artist-genres" => Self::ArtistGenres,
            "curated-tracks" => Self::CuratedTracks,
            "recently-played" => Self::RecentlyPlayed,
            "spotify-token" => Self::SpotifyToken,
            _ => {
                let (kind, id) = s.split_once(':').ok_or_else(|| UnknownTag(s.to_string()))?;
                if id.is_empty() || id.contains(char::is_whitespace) {
                    return Err(UnknownTag(s.to_string()));
                }
                match kind {
                    "artist" => Self::artist(id),
                    "track" => Self::track(id),
                    "playlist" => Self::playlist(id),
                    "user-playlists" => Self::user_playlists(id),
                    _ => return Err(UnknownTag(s.to_string())),
                }
            }
        };
        Ok(tag)
    }
}

/// A non-empty set of tags attached to one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTags(Vec<CacheTag>);

impl CacheTags {
    pub fn new(first: CacheTag) -> Self {
        Self(vec![first])
    }

    /// Adds a tag, ignoring duplicates.
    #[must_use]
    pub fn with(mut self, tag: CacheTag) -> Self {
        if !self.0.contains(&tag) {
            self.0.push(tag);
        }
        self
    }

    pub(crate) fn to_keys(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}
